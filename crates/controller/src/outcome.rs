use anyhow::Result;

/// Value sent alongside every result key.
pub const REPLY_VALUE: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    Exist,
    NonExist,
    Size(u64),
    NoReply,
}

impl Outcome {
    pub fn key(&self) -> Option<String> {
        match self {
            Outcome::Passed => Some("passed".to_string()),
            Outcome::Failed => Some("failed".to_string()),
            Outcome::Exist => Some("exist".to_string()),
            Outcome::NonExist => Some("non-exist".to_string()),
            Outcome::Size(bytes) => Some(bytes.to_string()),
            Outcome::NoReply => None,
        }
    }
}

/// Outbound half of the key-value channel to the device-side test.
pub trait ResultSink {
    fn send_kv(&mut self, key: &str, value: &str) -> Result<()>;
}

#[cfg(test)]
impl ResultSink for Vec<(String, String)> {
    fn send_kv(&mut self, key: &str, value: &str) -> Result<()> {
        self.push((key.to_string(), value.to_string()));
        Ok(())
    }
}

/// Sends the reply for `outcome`, if it has one.
pub fn reply(sink: &mut dyn ResultSink, outcome: Outcome) -> Result<()> {
    match outcome.key() {
        Some(key) => sink.send_kv(&key, REPLY_VALUE),
        None => Ok(()),
    }
}
