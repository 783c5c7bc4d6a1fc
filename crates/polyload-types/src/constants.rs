//! System-wide constants for polyload.

/// Default node endpoint (JSON-RPC over WebSocket).
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:9944";

/// Environment variable that overrides the configured endpoint.
pub const ENDPOINT_ENV_VAR: &str = "WS_PROVIDER";

/// Blocks with at most this many extrinsics only carry housekeeping
/// inherents (timestamp, parachain/final-hint) and do not count as useful work.
pub const DEFAULT_HOUSEKEEPING_EXTRINSICS: usize = 2;

/// Maximum number of legs accepted in a single instruction.
pub const MAX_LEGS_PER_INSTRUCTION: usize = 10;

/// Venue and instruction counters start at 1 on chain.
pub const FIRST_VENUE_ID: u64 = 1;

/// See [`FIRST_VENUE_ID`].
pub const FIRST_INSTRUCTION_ID: u64 = 1;

/// Amount each generated key is seeded with (10 units, 12 decimals).
pub const DEFAULT_TRANSFER_AMOUNT: u128 = 10 * 10u128.pow(12);

/// Top-up given to every freshly registered identity.
pub const DEFAULT_IDENTITY_TOP_UP: u128 = 10 * 10u128.pow(12);

/// Length of an asset ticker in bytes (NUL padded).
pub const TICKER_LEN: usize = 12;

/// Extrinsic format version byte for signed transactions (v4, signed bit set).
pub const SIGNED_EXTRINSIC_VERSION: u8 = 0x84;

/// Extrinsic format version byte for unsigned inherents (v4).
pub const UNSIGNED_EXTRINSIC_VERSION: u8 = 0x04;

/// Storage key of `System.Events`: `twox128("System") ++ twox128("Events")`.
pub const SYSTEM_EVENTS_STORAGE_KEY: &str =
    "0x26aa394eea5630e07c48ae0c9558cef780d41e5e16056765bc8461851072c9d7";

/// Module indices used when a dispatch error is raised by a pallet.
pub mod pallet {
    pub const SYSTEM: u8 = 0;
    pub const TIMESTAMP: u8 = 2;
    pub const BALANCES: u8 = 5;
    pub const IDENTITY: u8 = 7;
    pub const STAKING: u8 = 17;
    pub const PIPS: u8 = 22;
    pub const ASSET: u8 = 26;
    pub const PORTFOLIO: u8 = 27;
    pub const COMPLIANCE_MANAGER: u8 = 28;
    pub const SETTLEMENT: u8 = 36;
}

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tool name.
pub const TOOL_NAME: &str = "polyload";
