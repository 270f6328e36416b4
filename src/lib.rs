//! Voice Coach: step-driven voice onboarding for the assistive coach.

pub mod config;
pub mod error;
pub mod flow;
pub mod routes;
pub mod speech;
pub mod voice;
