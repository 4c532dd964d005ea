use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("exchange {id} was already settled")]
    AlreadySettled { id: u64 },
    #[error("mismatched expectation: expected {expected}, actual {actual}")]
    MismatchedExpectation { expected: String, actual: String },
    #[error("call {call} carried no body")]
    MissingBody { call: String },
    #[error("cancelled while waiting in {0}")]
    Cancelled(String),
    #[error("no canned response for {call}")]
    NoCannedResponse { call: String },
    #[error("rendezvous channel is closed")]
    ChannelClosed,
    #[error("another consumer is waiting on the channel ({pending} queued)")]
    ConsumerBusy { pending: usize },
    #[error("exchange {id} was dropped before it was settled")]
    ExchangeDropped { id: u64 },
    #[error("unexpected call {call}")]
    UnexpectedCall { call: String },
    #[error("unexpected response status {status}")]
    InvalidResponse { status: u16 },
    #[error("json error: {0}")]
    Json(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl HandoffError {
    /// True for the conditions produced by a cancellation token or deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
