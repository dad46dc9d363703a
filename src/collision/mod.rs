pub mod broadphase;
pub mod narrowphase;
