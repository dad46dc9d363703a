pub mod constraint_solver;
pub mod constraints;
pub mod island;
pub mod rigid_body;
pub mod world;
