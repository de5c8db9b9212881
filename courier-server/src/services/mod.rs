//! Delivery decisions that sit between the transports and the store.
pub mod delivery;
