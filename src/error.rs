use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("round already started")]
    RoundInProgress,
    #[error("peer list is empty")]
    EmptyPeerList,
}
