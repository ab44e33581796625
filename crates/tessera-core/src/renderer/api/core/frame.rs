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

//! Frame serial numbers.

use std::fmt;

/// A monotonically increasing identifier for a recorded frame.
///
/// Serial `0` ([`FrameSerial::NONE`]) means "never used by any frame" and is
/// always considered retired. The first real frame is serial `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameSerial(pub u64);

impl FrameSerial {
    /// The serial of a resource that has never been referenced by a frame.
    pub const NONE: FrameSerial = FrameSerial(0);

    /// Returns the serial that follows this one.
    pub const fn next(self) -> FrameSerial {
        FrameSerial(self.0 + 1)
    }

    /// Returns `true` if this is [`FrameSerial::NONE`].
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FrameSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::FrameSerial;

    #[test]
    fn test_serials_are_ordered() {
        let first = FrameSerial::NONE.next();
        assert_eq!(first, FrameSerial(1));
        assert!(first.next() > first);
        assert!(FrameSerial::NONE.is_none());
        assert!(!first.is_none());
        assert_eq!(format!("{}", FrameSerial(7)), "#7");
    }
}
