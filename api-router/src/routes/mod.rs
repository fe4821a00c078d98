pub mod articles;
pub mod liveness;
pub mod readiness;
pub mod sites;
pub mod sources;
