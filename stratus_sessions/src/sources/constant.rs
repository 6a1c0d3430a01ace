//! A session source that always yields the same session
//!
//! Useful for wiring tests and for environments where a session is
//! provisioned out of band.

use std::convert::Infallible;

use async_trait::async_trait;

use super::{AsyncSupplier, SourceError};
use crate::session::Session;

impl SourceError for Infallible {
    fn is_authorization(&self) -> bool {
        match *self {}
    }
}

/// Yields copies of a fixed session on every fetch
#[derive(Debug)]
pub struct ConstSessionSource {
    session: Session,
}

impl ConstSessionSource {
    /// Constructs a source around a fixed session
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl AsyncSupplier for ConstSessionSource {
    type Value = Session;
    type Error = Infallible;

    async fn fetch(&mut self) -> Result<Session, Infallible> {
        Ok(self.session.clone_it())
    }
}
