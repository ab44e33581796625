// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared-ownership command buffer being recorded for a frame.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tessera_core::renderer::{CommandBufferId, CommandRecorder, FrameSerial};

use crate::error::FrameError;

struct State {
    recorder: Option<Box<dyn CommandRecorder>>,
    draw_count: usize,
}

/// A command buffer under construction for one frame.
///
/// Cloning is cheap; all clones record into the same backend recorder. The
/// controller keeps one clone until submission while render commands record
/// through theirs, so both agree on when recording ends.
#[derive(Clone)]
pub struct CommandBuffer {
    serial: FrameSerial,
    state: Arc<Mutex<State>>,
}

impl CommandBuffer {
    /// Wraps a fresh recorder for frame `serial`.
    pub fn new(serial: FrameSerial, recorder: Box<dyn CommandRecorder>) -> Self {
        Self {
            serial,
            state: Arc::new(Mutex::new(State {
                recorder: Some(recorder),
                draw_count: 0,
            })),
        }
    }

    /// The frame this command buffer belongs to.
    pub fn serial(&self) -> FrameSerial {
        self.serial
    }

    /// Runs `f` against the recorder.
    ///
    /// Fails if the command buffer was already finished.
    pub fn record<R>(&self, f: impl FnOnce(&mut dyn CommandRecorder) -> R) -> Result<R, FrameError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.recorder.as_deref_mut() {
            Some(recorder) => Ok(f(recorder)),
            None => Err(FrameError::AlreadyFinished(self.serial)),
        }
    }

    /// Counts one recorded draw call.
    pub(crate) fn count_draw(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .draw_count += 1;
    }

    /// Number of draw calls recorded so far.
    pub fn draw_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .draw_count
    }

    /// Returns `true` once [`finish`](Self::finish) has been called on any clone.
    pub fn is_finished(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recorder
            .is_none()
    }

    /// Ends recording and returns the backend command buffer.
    pub fn finish(&self) -> Result<CommandBufferId, FrameError> {
        let recorder = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recorder
            .take()
            .ok_or(FrameError::AlreadyFinished(self.serial))?;
        Ok(recorder.finish())
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("serial", &self.serial)
            .field("draw_count", &self.draw_count())
            .field("finished", &self.is_finished())
            .finish()
    }
}
