use bytes::Bytes;
use tokio::time::{Duration, Instant};

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Set `key` to hold the string `value`, optionally expiring after `PX milliseconds` or
/// `EX seconds`. Any previous value and TTL of the key are discarded.
///
/// The command is validated as a whole: a malformed expiry rejects it without touching the
/// store.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: String,
    pub value: Bytes,
    pub ttl: Option<Ttl>,
}

#[derive(Debug, PartialEq)]
pub enum Ttl {
    Ex(u64),
    Px(u64),
}

impl Ttl {
    pub fn duration(&self) -> Duration {
        match self {
            Ttl::Ex(seconds) => Duration::from_secs(*seconds),
            Ttl::Px(millis) => Duration::from_millis(*millis),
        }
    }
}

impl Executable for Set {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let mut store = store.lock();

        match self.ttl {
            Some(ttl) => store.set_with_ttl(self.key, self.value, ttl.duration()),
            None => store.set(self.key, self.value),
        }

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        // SET key value [PX milliseconds | EX seconds]
        if !matches!(parser.remaining(), 2 | 4) {
            return Err(parser.wrong_number_of_arguments().into());
        }

        let key = parser.next_string()?;
        let value = parser.next_bytes()?;

        if parser.remaining() == 0 {
            return Ok(Self {
                key,
                value,
                ttl: None,
            });
        }

        let option = parser.next_string()?;
        let unit = match option.to_uppercase().as_str() {
            "PX" => Ttl::Px,
            "EX" => Ttl::Ex,
            _ => return Err(CommandParserError::SyntaxError.into()),
        };

        let amount = parser.next_integer()?;
        let ttl = u64::try_from(amount)
            .ok()
            .filter(|amount| *amount > 0)
            .map(unit)
            // An expiry too far in the future to be represented is as invalid as a negative one.
            .filter(|ttl| Instant::now().checked_add(ttl.duration()).is_some())
            .ok_or_else(|| CommandParserError::InvalidExpireTime {
                command: "set".to_string(),
            })?;

        Ok(Self {
            key,
            value,
            ttl: Some(ttl),
        })
    }
}
