//! Sign-in feature flags.

use bitflags::bitflags;
use bytes::BufMut;

use crate::{codec::WireFormat, errors::Result};

bitflags! {
    /// Optional behaviours a client asks for when signing in.
    ///
    /// Unknown bits are carried through unchanged so newer clients can talk
    /// to older servers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FeatureFlags: u64 {
        /// Client wants structural (meta) update notifications
        const ENABLE_METAUPDATE = 1 << 0;
    }
}

impl WireFormat for FeatureFlags {
    fn encoded_len(&self) -> usize {
        8
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.bits().encode(buf);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        u64::decode(buf).map(Self::from_bits_retain)
    }
}
