// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;
use tower::BoxError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("position store error: {0}")]
    PositionStore(String),

    #[error("listener error: {0}")]
    Listener(BoxError),
}

pub type Result<T> = std::result::Result<T, Error>;
