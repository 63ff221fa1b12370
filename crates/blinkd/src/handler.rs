//! Command dispatch
//!
//! Decodes a parsed RESP frame into a verb plus arguments, runs it against
//! the engine, and produces the reply frame. Protocol and argument failures
//! stay on the connection as `-ERR` replies; only EXIT escalates into a
//! server shutdown.

use crate::resp::RespValue;
use blinkcache::BlinkCache;
use std::sync::Arc;
use tracing::debug;

/// Outcome of one dispatched command
pub struct Reply {
    /// Frame to send back to the client
    pub value: RespValue,
    /// True when the server should begin graceful shutdown
    pub shutdown: bool,
}

impl Reply {
    fn of(value: RespValue) -> Self {
        Reply {
            value,
            shutdown: false,
        }
    }

    fn ok() -> Self {
        Reply::of(RespValue::Simple("OK".to_string()))
    }

    fn err(msg: impl Into<String>) -> Self {
        Reply::of(RespValue::Error(msg.into()))
    }
}

/// Dispatches decoded commands against the shared engine
pub struct CommandHandler {
    engine: Arc<BlinkCache>,
}

impl CommandHandler {
    pub fn new(engine: Arc<BlinkCache>) -> Self {
        Self { engine }
    }

    pub fn handle(&self, frame: RespValue) -> Reply {
        let args = match frame {
            RespValue::Array(Some(args)) if !args.is_empty() => args,
            _ => return Reply::err("ERR invalid command format"),
        };

        let raw_verb = match args[0].as_bulk() {
            Some(v) => String::from_utf8_lossy(v).into_owned(),
            None => return Reply::err("ERR invalid command format"),
        };
        let verb = raw_verb.to_uppercase();
        debug!(verb = %verb, args = args.len() - 1, "dispatching command");

        match verb.as_str() {
            "PING" => self.ping(&args[1..]),
            "ECHO" => self.echo(&args[1..]),
            "SET" => self.set(&args[1..]),
            "GET" => self.get(&args[1..]),
            "DEL" => self.del(&args[1..]),
            "CLEAR" | "FLUSHDB" | "FLUSHALL" => self.clear(),
            "SAVE" => self.save(),
            "INFO" => self.info(),
            "EXIT" => Reply {
                value: RespValue::Simple("OK".to_string()),
                shutdown: true,
            },
            _ => Reply::err(format!("ERR unknown command '{}'", raw_verb)),
        }
    }

    fn ping(&self, args: &[RespValue]) -> Reply {
        match args {
            [] => Reply::of(RespValue::Simple("PONG".to_string())),
            [msg] => Reply::of(msg.clone()),
            _ => Reply::err("ERR wrong number of arguments for 'ping' command"),
        }
    }

    fn echo(&self, args: &[RespValue]) -> Reply {
        match args {
            [msg] => Reply::of(msg.clone()),
            _ => Reply::err("ERR wrong number of arguments for 'echo' command"),
        }
    }

    fn set(&self, args: &[RespValue]) -> Reply {
        if args.len() != 2 {
            return Reply::err("ERR wrong number of arguments for 'set' command");
        }
        let (Some(key), Some(value)) = (args[0].as_bulk(), args[1].as_bulk()) else {
            return Reply::err("ERR invalid argument type");
        };

        match self.engine.set(key, value) {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::err(format!("ERR {}", e)),
        }
    }

    fn get(&self, args: &[RespValue]) -> Reply {
        if args.len() != 1 {
            return Reply::err("ERR wrong number of arguments for 'get' command");
        }
        let Some(key) = args[0].as_bulk() else {
            return Reply::err("ERR invalid argument type");
        };

        Reply::of(RespValue::Bulk(self.engine.get(key)))
    }

    fn del(&self, args: &[RespValue]) -> Reply {
        if args.is_empty() {
            return Reply::err("ERR wrong number of arguments for 'del' command");
        }

        let mut deleted = 0i64;
        for arg in args {
            let Some(key) = arg.as_bulk() else {
                return Reply::err("ERR invalid argument type");
            };
            match self.engine.del(key) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => return Reply::err(format!("ERR {}", e)),
            }
        }

        Reply::of(RespValue::Integer(deleted))
    }

    fn clear(&self) -> Reply {
        match self.engine.clear() {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::err(format!("ERR {}", e)),
        }
    }

    fn save(&self) -> Reply {
        match self.engine.flush() {
            Ok(()) => Reply::ok(),
            Err(e) => Reply::err(format!("ERR {}", e)),
        }
    }

    fn info(&self) -> Reply {
        let stats = self.engine.stats();
        let body = format!(
            "# Server\r\n\
             blink_version:{}\r\n\
             \r\n\
             # Storage\r\n\
             durable_keys:{}\r\n\
             cache_size:{}\r\n\
             cache_capacity:{}\r\n\
             pending_writes:{}\r\n\
             \r\n\
             # Stats\r\n\
             cache_hits:{}\r\n\
             cache_misses:{}\r\n\
             cache_evictions:{}\r\n\
             cache_hit_ratio:{:.2}\r\n\
             queued_writes:{}\r\n\
             direct_writes:{}\r\n\
             failed_writes:{}\r\n",
            env!("CARGO_PKG_VERSION"),
            self.engine.len(),
            self.engine.cache_len(),
            self.engine.capacity(),
            self.engine.pending_writes(),
            stats.hits(),
            stats.misses(),
            stats.evictions(),
            stats.hit_ratio(),
            stats.queued_writes(),
            stats.direct_writes(),
            stats.failed_writes(),
        );
        Reply::of(RespValue::Bulk(Some(body.into_bytes())))
    }
}
