use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Username;

pub const DEFAULT_LIST_LIMIT: u32 = 15;
pub const MAX_LIST_LIMIT: u32 = 200;

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: Username,
    pub password: String,
}

// -- Threads --

/// `?limit=&offset=` on the thread listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListQueryError {
    #[error("limit must be greater than or equal to 1")]
    Limit,
    #[error("offset must be greater than or equal to 0")]
    Offset,
}

impl ListQuery {
    /// Resolve to `(limit, offset)`, applying defaults and the limit cap.
    pub fn resolve(&self) -> Result<(u32, u32), ListQueryError> {
        let limit = match self.limit {
            None => DEFAULT_LIST_LIMIT,
            Some(l) if l < 1 => return Err(ListQueryError::Limit),
            Some(l) => l.min(MAX_LIST_LIMIT as i64) as u32,
        };
        let offset = match self.offset {
            None => 0,
            Some(o) if o < 0 => return Err(ListQueryError::Offset),
            Some(o) => u32::try_from(o).map_err(|_| ListQueryError::Offset)?,
        };
        Ok((limit, offset))
    }
}
