// lirkgen — Lifted-IRK integrator generator
//
// Library root. Generation phases and the block-matrix substrate live here.

pub mod block_matrix;
pub mod codegen;
pub mod config;
pub mod diag;
pub mod exec;
pub mod generator;
pub mod ir;
pub mod linsolve;
pub mod merit;
pub mod model;
pub mod models;
pub mod phase;
pub mod plan;
