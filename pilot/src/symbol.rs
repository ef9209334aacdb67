use std::fmt;
use std::str::Utf8Error;

/// One command from the gesture relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// Blank frame. Also the value of the command slot before the first read.
    Idle,
    Hover,
    Up,
    Down,
    YawLeft,
    YawRight,
    PitchForward,
    PitchBackward,
    RollLeft,
    RollRight,
    Stop,
    Unknown(char),
}

impl Symbol {
    /// Decodes the text of one input frame.
    ///
    /// Padding (NUL bytes and whitespace) is stripped. Frames carrying more
    /// than one character are not part of the alphabet and decode to
    /// `Unknown` with their first character.
    pub fn decode(frame: &[u8]) -> Result<Self, Utf8Error> {
        let text = std::str::from_utf8(frame)?;
        let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());

        let mut chars = text.chars();
        let symbol = match (chars.next(), chars.next()) {
            (None, _) => Symbol::Idle,
            (Some(c), None) => Symbol::from(c),
            (Some(c), Some(_)) => Symbol::Unknown(c),
        };
        Ok(symbol)
    }
}

impl From<char> for Symbol {
    fn from(c: char) -> Self {
        match c {
            'h' => Symbol::Hover,
            'u' => Symbol::Up,
            'd' => Symbol::Down,
            'l' => Symbol::YawLeft,
            'r' => Symbol::YawRight,
            'f' => Symbol::PitchForward,
            'b' => Symbol::PitchBackward,
            'o' => Symbol::RollLeft,
            'p' => Symbol::RollRight,
            's' => Symbol::Stop,
            other => Symbol::Unknown(other),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Symbol::Idle => return f.write_str("idle"),
            Symbol::Hover => 'h',
            Symbol::Up => 'u',
            Symbol::Down => 'd',
            Symbol::YawLeft => 'l',
            Symbol::YawRight => 'r',
            Symbol::PitchForward => 'f',
            Symbol::PitchBackward => 'b',
            Symbol::RollLeft => 'o',
            Symbol::RollRight => 'p',
            Symbol::Stop => 's',
            Symbol::Unknown(c) => *c,
        };
        write!(f, "{c}")
    }
}
