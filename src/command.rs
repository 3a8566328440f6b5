//! Text control protocol: one command per message.
//!
//! ```text
//! setrgb <id> <r> <g> <b>     set one light (or every light via the multicast id)
//! list                        connected ids, comma terminated
//! discover                    rescan the radio
//! temp <id> | uptime <id> | version <id>
//! ping...                     echoed back verbatim
//! RRGGBB,RRGGBB,...           bulk frame for lights 1, 2, 3, ...
//! ```

use light_bridge_protocol::Color;

pub const REPLY_OK: &str = "OK";
pub const REPLY_INVALID_ARGUMENTS: &str = "Error: invalid arguments";
pub const REPLY_NOT_RESPONDING: &str = "Error: light not responding";
pub const REPLY_UNRECOGNIZED: &str = "Error: unrecognized command";

pub fn invalid_arguments_for(id: usize) -> String {
    format!("Error: invalid arguments for ID {}", id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    SetRgb { id: u8, color: Color },
    List,
    Discover,
    Temperature(u8),
    Uptime(u8),
    Version(u8),
    /// Carries the message exactly as received; it is also the reply.
    Ping(String),
    /// Colors for ids 1, 2, ... up to the first malformed entry, whose id is
    /// reported in `invalid_id`.
    Frame {
        colors: Vec<Color>,
        invalid_id: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidArguments,
    Unrecognized,
}

impl ParseError {
    pub fn reply(self) -> &'static str {
        match self {
            ParseError::InvalidArguments => REPLY_INVALID_ARGUMENTS,
            ParseError::Unrecognized => REPLY_UNRECOGNIZED,
        }
    }
}

impl ControlCommand {
    pub fn parse(message: &str) -> Result<Self, ParseError> {
        if message.starts_with("ping") {
            return Ok(ControlCommand::Ping(message.to_string()));
        }

        let line = message.trim_end();
        if is_hex_triplet(line.split(',').next().unwrap_or_default()) {
            return Ok(parse_frame(line));
        }

        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(ParseError::Unrecognized);
        };
        let args: Vec<&str> = words.collect();

        match name {
            "setrgb" => {
                let [id, r, g, b] = byte_args::<4>(&args)?;
                Ok(ControlCommand::SetRgb {
                    id,
                    color: Color::new(r, g, b),
                })
            }
            "list" => no_args(&args).map(|_| ControlCommand::List),
            "discover" => no_args(&args).map(|_| ControlCommand::Discover),
            "temp" => byte_args::<1>(&args).map(|[id]| ControlCommand::Temperature(id)),
            "uptime" => byte_args::<1>(&args).map(|[id]| ControlCommand::Uptime(id)),
            "version" => byte_args::<1>(&args).map(|[id]| ControlCommand::Version(id)),
            _ => Err(ParseError::Unrecognized),
        }
    }
}

fn no_args(args: &[&str]) -> Result<(), ParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ParseError::InvalidArguments)
    }
}

fn byte_args<const N: usize>(args: &[&str]) -> Result<[u8; N], ParseError> {
    if args.len() != N {
        return Err(ParseError::InvalidArguments);
    }
    let mut out = [0u8; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.parse().map_err(|_| ParseError::InvalidArguments)?;
    }
    Ok(out)
}

fn is_hex_triplet(token: &str) -> bool {
    token.len() == 6 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_frame(line: &str) -> ControlCommand {
    let mut colors = Vec::new();
    let mut tokens = line.split(',').peekable();

    while let Some(token) = tokens.next() {
        // A single trailing comma ends the frame.
        if token.is_empty() && tokens.peek().is_none() {
            break;
        }
        match parse_hex_color(token) {
            Some(color) => colors.push(color),
            None => {
                let invalid_id = colors.len() + 1;
                return ControlCommand::Frame {
                    colors,
                    invalid_id: Some(invalid_id),
                };
            }
        }
    }

    ControlCommand::Frame {
        colors,
        invalid_id: None,
    }
}

fn parse_hex_color(token: &str) -> Option<Color> {
    if !is_hex_triplet(token) {
        return None;
    }
    let value = u32::from_str_radix(token, 16).ok()?;
    let [_, r, g, b] = value.to_be_bytes();
    Some(Color::new(r, g, b))
}
