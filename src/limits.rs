//! Hard bounds on inputs and state growth. These are operational guards,
//! not business rules.

pub const MAX_ROOMS_PER_TENANT: usize = 4096;
pub const MAX_ROOM_NAME_LEN: usize = 256;
pub const MAX_USER_ID_LEN: usize = 256;

/// Largest accepted room capacity. Bookings are held in memory per day, so
/// an absurd capacity is an operational hazard, not a business need.
pub const MAX_ROOM_CAPACITY: u32 = 10_000;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 128;
