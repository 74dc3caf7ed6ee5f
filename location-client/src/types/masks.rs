//! Bit masks used across the client contract.
//!
//! Each mask is a thin `u32` newtype with named bit constants. Unknown bits
//! are dropped by [`from_bits_truncate`](EngineMask::from_bits_truncate) so a
//! newer engine cannot smuggle undefined flags into client callbacks.

use std::fmt;

use serde::Serialize;

macro_rules! bit_mask {
    (
        $(#[$meta:meta])*
        $name:ident {
            $(
                $(#[$flag_meta:meta])*
                $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
        pub struct $name(u32);

        impl $name {
            $(
                $(#[$flag_meta])*
                pub const $flag: Self = Self($value);
            )*

            /// Mask with no bits set.
            pub const NONE: Self = Self(0);

            /// Mask with every defined bit set.
            pub const ALL: Self = Self(0 $(| $value)*);

            /// Build a mask from raw bits, dropping undefined bits.
            pub const fn from_bits_truncate(bits: u32) -> Self {
                Self(bits & Self::ALL.0)
            }

            /// Raw bits.
            pub const fn bits(self) -> u32 {
                self.0
            }

            /// True if no bit is set.
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// True if every bit of `other` is set in `self`.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// True if `self` and `other` share at least one bit.
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Number of bits set.
            pub const fn count(self) -> u32 {
                self.0.count_ones()
            }

            /// Set the bits of `other`.
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Clear the bits of `other`.
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }
    };
}

bit_mask! {
    /// Position engines a client asks to receive reports from.
    ///
    /// `FUSED` is not an engine of its own: it names the aggregate stream the
    /// engine layer synthesizes when two or more engines run, and degrades to
    /// the unmodified SPE stream when SPE is the only engine.
    EngineMask {
        /// Fused/default position.
        FUSED = 1 << 0;
        /// Unmodified standard position engine output.
        SPE = 1 << 1;
        /// Unmodified precise position engine output.
        PPE = 1 << 2;
    }
}

bit_mask! {
    /// Engines actually running on the system.
    ///
    /// This is an external fact reported by the engine layer
    /// ([`EngineEvent::EnginesChanged`](crate::engine::EngineEvent::EnginesChanged)),
    /// never something a client controls.
    RunningEngines {
        /// Standard GNSS position engine.
        SPE = 1 << 0;
        /// Dead-reckoning engine.
        DR = 1 << 1;
        /// Precise position engine.
        PPE = 1 << 2;
    }
}

bit_mask! {
    /// Geofence transitions.
    GeofenceBreachMask {
        /// Device entered the region.
        ENTER = 1 << 0;
        /// Device left the region.
        EXIT = 1 << 1;
        /// Device stayed inside for the dwell time.
        DWELL_IN = 1 << 2;
        /// Device stayed outside for the dwell time.
        DWELL_OUT = 1 << 3;
    }
}

bit_mask! {
    /// What the positioning service can do, reported once per client.
    CapabilitiesMask {
        /// Time-based tracking sessions.
        TIME_BASED_TRACKING = 1 << 0;
        /// Time-based batching sessions.
        TIME_BASED_BATCHING = 1 << 1;
        /// Distance-based tracking sessions.
        DISTANCE_BASED_TRACKING = 1 << 2;
        /// Distance-based batching sessions.
        DISTANCE_BASED_BATCHING = 1 << 3;
        /// Geofencing.
        GEOFENCE = 1 << 4;
        /// Outdoor trip batching.
        OUTDOOR_TRIP_BATCHING = 1 << 5;
    }
}

bit_mask! {
    /// Valid fields of a [`Location`](super::Location).
    LocationFlags {
        /// Latitude and longitude.
        LAT_LONG = 1 << 0;
        /// Altitude.
        ALTITUDE = 1 << 1;
        /// Speed.
        SPEED = 1 << 2;
        /// Bearing.
        BEARING = 1 << 3;
        /// Horizontal accuracy.
        ACCURACY = 1 << 4;
        /// Vertical accuracy.
        VERTICAL_ACCURACY = 1 << 5;
        /// Speed accuracy.
        SPEED_ACCURACY = 1 << 6;
        /// Bearing accuracy.
        BEARING_ACCURACY = 1 << 7;
        /// Timestamp.
        TIMESTAMP = 1 << 8;
    }
}

/// The engine that produced a [`GnssLocation`](super::GnssLocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum EngineKind {
    /// Aggregate of all running engines.
    #[default]
    Fused,
    /// Standard position engine.
    Spe,
    /// Precise position engine.
    Ppe,
}

impl EngineKind {
    /// All output engine kinds, in delivery order.
    pub const ALL: [EngineKind; 3] = [EngineKind::Fused, EngineKind::Spe, EngineKind::Ppe];

    /// The request bit that selects this engine's stream.
    pub const fn mask(self) -> EngineMask {
        match self {
            EngineKind::Fused => EngineMask::FUSED,
            EngineKind::Spe => EngineMask::SPE,
            EngineKind::Ppe => EngineMask::PPE,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineKind::Fused => "fused",
            EngineKind::Spe => "spe",
            EngineKind::Ppe => "ppe",
        };
        f.write_str(name)
    }
}

impl EngineMask {
    /// Engine kinds selected by this mask, in delivery order.
    pub fn kinds(self) -> impl Iterator<Item = EngineKind> {
        EngineKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.mask()))
    }
}

impl RunningEngines {
    /// True when the engine layer synthesizes a fused stream.
    pub const fn has_fused_stream(self) -> bool {
        self.count() >= 2
    }

    /// True if the output engine kind has a running source.
    ///
    /// The fused stream always has a source as long as any engine runs.
    pub const fn produces(self, kind: EngineKind) -> bool {
        match kind {
            EngineKind::Fused => !self.is_empty(),
            EngineKind::Spe => self.contains(RunningEngines::SPE),
            EngineKind::Ppe => self.contains(RunningEngines::PPE),
        }
    }
}
