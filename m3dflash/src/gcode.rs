//! Minimal G-code request model.
//!
//! Only what is needed to talk to the printer's firmware: parse a command
//! line, look up parameters, and render it either as text or as a
//! Repetier-style binary frame (protocol v1).
//!
//! ## Binary frame
//!
//! ```text
//! +-----------+------------------------------+--------+--------+
//! | mask (LE) | values in mask bit order     |  sum1  |  sum2  |
//! |  2 bytes  | N u16, M u16, G u8,          | 1 byte | 1 byte |
//! |           | X/Y/Z/E/F f32, T u8,         |        |        |
//! |           | S i32, P i32                 |        |        |
//! +-----------+------------------------------+--------+--------+
//! ```
//!
//! Bit 7 of the mask is always set so the firmware can tell binary frames
//! from text. The trailer is a Fletcher-16 checksum over every preceding
//! byte.

use {
    crate::error::{Error, Result},
    byteorder::{LittleEndian, WriteBytesExt},
    std::{fmt, str::FromStr},
};

/// Mask bit that marks a binary frame.
const BINARY_MARKER: u16 = 1 << 7;

/// Supported parameter letters with their mask bit, in frame order.
const FIELDS: [(char, u16); 11] = [
    ('N', 0),
    ('M', 1),
    ('G', 2),
    ('X', 3),
    ('Y', 4),
    ('Z', 5),
    ('E', 6),
    ('F', 8),
    ('T', 9),
    ('S', 10),
    ('P', 11),
];

fn mask_bit(letter: char) -> Option<u16> {
    FIELDS.iter().find(|(l, _)| *l == letter).map(|(_, bit)| *bit)
}

/// Framing used when sending a command to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Plain text, reply read as unterminated ASCII.
    #[default]
    Ascii,
    /// Binary frame, reply read as a newline-terminated line.
    Binary,
}

/// A parsed G-code command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gcode {
    line_number: Option<u16>,
    params: Vec<(char, String)>,
}

impl Gcode {
    /// Parse a single command line.
    ///
    /// Comments after `;` and a trailing `*checksum` are dropped, as is a
    /// leading `N` line number; use [`with_line_number`](Self::with_line_number)
    /// to send one.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.split(';').next().unwrap_or_default();
        let line = line.split('*').next().unwrap_or_default().trim();
        if line.is_empty() {
            return Err(Error::InvalidGcode("empty command".into()));
        }

        let mut params: Vec<(char, String)> = Vec::new();
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if c.is_whitespace() {
                continue;
            }
            if !c.is_ascii_alphabetic() {
                return Err(Error::InvalidGcode(format!(
                    "expected a parameter letter in {line:?}, found {c:?}"
                )));
            }

            let letter = c.to_ascii_uppercase();
            if mask_bit(letter).is_none() {
                return Err(Error::InvalidGcode(format!("unsupported parameter {letter}")));
            }

            let mut value = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_whitespace() || next.is_ascii_alphabetic() {
                    break;
                }
                value.push(next);
                chars.next();
            }

            if letter == 'N' {
                continue;
            }
            if params.iter().any(|(l, _)| *l == letter) {
                return Err(Error::InvalidGcode(format!("parameter {letter} given twice")));
            }
            params.push((letter, value));
        }

        if params.is_empty() {
            return Err(Error::InvalidGcode(format!("no command in {line:?}")));
        }

        Ok(Self {
            line_number: None,
            params,
        })
    }

    /// Attach a line number.
    #[must_use]
    pub fn with_line_number(mut self, n: u16) -> Self {
        self.line_number = Some(n);
        self
    }

    /// Line number, if any.
    pub fn line_number(&self) -> Option<u16> {
        self.line_number
    }

    /// Value of parameter `letter` (case-insensitive).
    ///
    /// A parameter given without a value returns `Some("")`.
    pub fn value(&self, letter: char) -> Option<&str> {
        let letter = letter.to_ascii_uppercase();
        self.params
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, v)| v.as_str())
    }

    /// Whether this is the command that resets the printer into its
    /// bootloader (`M115 S628`).
    pub fn is_bootloader_switch(&self) -> bool {
        let number = |letter| self.value(letter).and_then(|v| v.parse::<u32>().ok());
        number('M') == Some(115) && number('S') == Some(628)
    }

    /// Render as text, parameters in the order given, without a newline.
    pub fn to_ascii(&self) -> String {
        let mut words: Vec<String> = Vec::with_capacity(self.params.len() + 1);
        if let Some(n) = self.line_number {
            words.push(format!("N{n}"));
        }
        words.extend(self.params.iter().map(|(l, v)| format!("{l}{v}")));
        words.join(" ")
    }

    /// Render as a binary frame.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut mask = BINARY_MARKER;
        if self.line_number.is_some() {
            mask |= 1;
        }
        for (letter, _) in &self.params {
            if let Some(bit) = mask_bit(*letter) {
                mask |= 1 << bit;
            }
        }

        let mut frame = Vec::with_capacity(32);
        frame.write_u16::<LittleEndian>(mask).unwrap();

        for (letter, _) in FIELDS {
            if letter == 'N' {
                if let Some(n) = self.line_number {
                    frame.write_u16::<LittleEndian>(n).unwrap();
                }
                continue;
            }
            let Some(value) = self.value(letter) else {
                continue;
            };
            match letter {
                'M' => frame
                    .write_u16::<LittleEndian>(parse_number(letter, value)?)
                    .unwrap(),
                'G' | 'T' => frame.write_u8(parse_number(letter, value)?).unwrap(),
                'S' | 'P' => frame
                    .write_i32::<LittleEndian>(parse_number(letter, value)?)
                    .unwrap(),
                _ => frame
                    .write_f32::<LittleEndian>(parse_number(letter, value)?)
                    .unwrap(),
            }
        }

        let (sum1, sum2) = fletcher16(&frame);
        frame.push(sum1);
        frame.push(sum2);
        Ok(frame)
    }
}

/// Parse a parameter value; an empty value is zero.
fn parse_number<T: FromStr + Default>(letter: char, value: &str) -> Result<T> {
    if value.is_empty() {
        return Ok(T::default());
    }
    value
        .parse()
        .map_err(|_| Error::InvalidGcode(format!("invalid value {value:?} for {letter}")))
}

/// Fletcher-16 checksum as used by Repetier binary frames.
fn fletcher16(data: &[u8]) -> (u8, u8) {
    let (mut sum1, mut sum2) = (0u16, 0u16);
    for &b in data {
        sum1 = (sum1 + u16::from(b)) % 255;
        sum2 = (sum2 + sum1) % 255;
    }
    #[allow(clippy::cast_possible_truncation)]
    (sum1 as u8, sum2 as u8)
}

impl FromStr for Gcode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Gcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ascii())
    }
}
