use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// An additional log destination was registered without a writer.
    #[error("invalid log writer")]
    InvalidSink,
}
