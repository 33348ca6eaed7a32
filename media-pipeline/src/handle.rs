/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Lazily created, destroy-once codec handles.

use crate::{PipelineError, Result};

/// Lifecycle of an encoder or decoder handle owned by a session.
///
/// A handle is created at most once and released at most once. After
/// [`Handle::destroy`] every access fails with [`PipelineError::Destroyed`].
#[derive(Debug, Default)]
pub enum Handle<T> {
    #[default]
    Uncreated,
    Live(T),
    Destroyed,
}

impl<T> Handle<T> {
    /// Returns the live handle, creating it with `create` on first use.
    pub fn get_or_try_create<F>(&mut self, what: &'static str, create: F) -> Result<&mut T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Handle::Uncreated = self {
            *self = Handle::Live(create()?);
        }
        match self {
            Handle::Live(inner) => Ok(inner),
            _ => {
                log::error!("{what} used after the stream was destroyed");
                Err(PipelineError::Destroyed(what))
            }
        }
    }

    pub fn live_mut(&mut self) -> Option<&mut T> {
        match self {
            Handle::Live(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Handle::Live(_))
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, Handle::Destroyed)
    }

    /// Releases the handle through `release` if it is live. Returns whether a
    /// release happened; later calls are no-ops.
    pub fn destroy<F>(&mut self, release: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match std::mem::replace(self, Handle::Destroyed) {
            Handle::Live(mut inner) => {
                release(&mut inner);
                true
            }
            _ => false,
        }
    }
}
