//! Console I/O provider
//!
//! The virtual machine talks to the outside world through the
//! [`Console`] trait: a blocking byte source (the keyboard) and a byte
//! sink (the display). Two implementations are provided. [`Terminal`]
//! connects the machine to stdin/stdout and intercepts `q` to offer a
//! confirm-to-quit prompt. [`Scripted`] feeds a queue of prepared input
//! and captures everything the machine prints, so tests can run
//! programs deterministically and assert on their output.

use std::io::{self, Read, Write};
use std::process;

use queues::{IsQueue, Queue};

/// Capability set required by the interpreter for keyboard and
/// display traffic. `get_char` blocks until a character is available.
pub trait Console {
    fn get_char(&mut self) -> u8;
    fn put_char(&mut self, ch: u8);
    fn print(&mut self, text: &str);
}

/// Console backed by the process's stdin and stdout
#[derive(Debug, Default)]
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    /// Read one byte from stdin. End of input terminates the process,
    /// since the machine has no way to make progress without it.
    fn read_byte(&mut self) -> u8 {
        let mut buf = [0u8; 1];
        match io::stdin().lock().read(&mut buf) {
            Ok(0) => process::exit(0),
            Ok(_) => buf[0],
            Err(e) => {
                eprintln!("error reading stdin: {e}");
                process::exit(1);
            }
        }
    }
}

impl Console for Terminal {
    fn get_char(&mut self) -> u8 {
        loop {
            let byte = self.read_byte();
            if byte == b'q' {
                self.print("\nReally quit? (y/n) ");
                if self.read_byte() == b'y' {
                    process::exit(0);
                }
                continue;
            }
            return byte;
        }
    }

    fn put_char(&mut self, ch: u8) {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&[ch]).expect("stdout write should work");
        stdout.flush().expect("stdout flush should work");
    }

    fn print(&mut self, text: &str) {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(text.as_bytes())
            .expect("stdout write should work");
        stdout.flush().expect("stdout flush should work");
    }
}

/// Console with a prepared input queue and a captured output buffer
#[derive(Debug, Default)]
pub struct Scripted {
    input: Queue<u8>,
    output: Queue<char>,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the bytes of `text` to the pending input queue
    pub fn feed(&mut self, text: &str) {
        for byte in text.bytes() {
            self.input
                .add(byte)
                .expect("insert into queue should work");
        }
    }

    /// Return the captured output so far and clear the buffer
    pub fn take_output(&mut self) -> String {
        let mut out = String::new();
        while let Ok(ch) = self.output.remove() {
            out.push(ch);
        }
        out
    }
}

impl Console for Scripted {
    fn get_char(&mut self) -> u8 {
        self.input
            .remove()
            .expect("scripted console ran out of input")
    }

    fn put_char(&mut self, ch: u8) {
        self.output
            .add(ch as char)
            .expect("insert into queue should work");
    }

    fn print(&mut self, text: &str) {
        for ch in text.chars() {
            self.output
                .add(ch)
                .expect("insert into queue should work");
        }
    }
}
