//! Newline-delimited integer input.

use std::io;
use std::io::prelude::*;

/// Iterator over the well-formed integer records of a text stream.
///
/// One record per line. Lines that do not parse as a signed 64-bit integer
/// are skipped with a warning and never reach the sorter, so they are also
/// excluded from the reported record count. I/O errors are not skipped.
pub struct IntegerLines<R: BufRead> {
    lines: io::Lines<R>,
}

impl<R: BufRead> IntegerLines<R> {
    pub fn new(reader: R) -> Self {
        IntegerLines {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for IntegerLines<R> {
    type Item = io::Result<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) => match line.trim().parse::<i64>() {
                    Ok(value) => return Some(Ok(value)),
                    Err(_) => {
                        log::warn!("skipping malformed input line {:?}", line);
                        continue;
                    }
                },
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
