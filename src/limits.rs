//! Hard limits. Requests beyond these fail with `LimitExceeded` or `Validation`
//! instead of growing state without bound.

use crate::model::Minute;

pub const MAX_TENANTS: usize = 128;
pub const MAX_TENANT_NAME_LEN: usize = 64;

pub const MAX_COURTS_PER_TENANT: usize = 10_000;
pub const MAX_CASES_PER_TENANT: usize = 1_000_000;

/// One-minute slots over a full day is the densest possible ledger.
pub const MAX_HEARINGS_PER_DAY: usize = 1_440;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_JUDGE_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4_096;

pub const MINUTES_PER_DAY: Minute = 1_440;
pub const MIN_SLOT_MINUTES: Minute = 5;
