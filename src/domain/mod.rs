// Domain layer: load-test models and ports. No HTTP or runtime specifics here.

pub mod model;
pub mod ports;
