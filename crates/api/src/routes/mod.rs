pub mod dead_letters;
pub mod events;
pub mod health;
pub mod metrics;
pub mod reservations;
pub mod transits;
