//! Console: where input lines come from and output lines go

use std::cell::RefCell;
use std::fmt;
use std::io::{self, BufRead, IsTerminal, Write};
use std::rc::Rc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// A source of input lines.
pub trait LineSource {
    /// Read one line; `None` at end of input.
    fn read_line(
        &mut self,
        prompt: &str,
    ) -> io::Result<Option<String>>;
}

/// Lines from any buffered reader (scripts, pipes, tests)
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn read_line(
        &mut self,
        _prompt: &str,
    ) -> io::Result<Option<String>> {
        let mut line = String::new();
        match self.reader.read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    }
}

/// Interactive lines from a rustyline editor
pub struct EditorSource {
    editor: DefaultEditor,
    history: bool,
}

impl EditorSource {
    pub fn new(history: bool) -> io::Result<Self> {
        let editor = DefaultEditor::new().map_err(io::Error::other)?;
        Ok(Self { editor, history })
    }
}

impl LineSource for EditorSource {
    fn read_line(
        &mut self,
        prompt: &str,
    ) -> io::Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if self.history && !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(Some(line))
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => Ok(None),
            Err(ReadlineError::Io(err)) => Err(err),
            Err(err) => Err(io::Error::other(err)),
        }
    }
}

/// Output buffer shared with the caller, for capturing console output.
#[derive(Clone, Default)]
pub struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Capture {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Line-oriented console used by the runtime and its modules
pub struct Console {
    input: RefCell<Box<dyn LineSource>>,
    output: RefCell<Box<dyn Write>>,
}

impl fmt::Debug for Console {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Console {
    pub fn new(
        input: Box<dyn LineSource>,
        output: Box<dyn Write>,
    ) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
        }
    }

    /// Standard streams; a terminal gets a line editor.
    pub fn stdio(history: bool) -> io::Result<Self> {
        let input: Box<dyn LineSource> = if io::stdin().is_terminal() {
            Box::new(EditorSource::new(history)?)
        } else {
            Box::new(ReaderSource::new(io::stdin().lock()))
        };
        Ok(Self::new(input, Box::new(io::stdout())))
    }

    /// Read from `input` and capture output in memory.
    pub fn captured(input: impl BufRead + 'static) -> (Self, Capture) {
        let capture = Capture::default();
        let console = Self::new(
            Box::new(ReaderSource::new(input)),
            Box::new(capture.clone()),
        );
        (console, capture)
    }

    pub fn read_line(
        &self,
        prompt: &str,
    ) -> io::Result<Option<String>> {
        self.input.borrow_mut().read_line(prompt)
    }

    pub fn write_line(
        &self,
        line: &str,
    ) -> io::Result<()> {
        let mut output = self.output.borrow_mut();
        writeln!(output, "{}", line)?;
        output.flush()
    }
}
