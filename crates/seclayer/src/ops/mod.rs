//! The layer operators.
//!
//! Every operator reads the calling party's shares of its inputs and writes its shares of the
//! result into `out`, which must not alias an input. Both parties have to call the same
//! operators in the same order with the same public parameters.
//!
//! If verification is enabled, inputs and outputs are revealed to the client after the call
//! and compared against the cleartext computation. The comparison only logs.
use crate::domain::Domain;

pub mod linear;
pub mod local;
pub mod nonlinear;

pub use linear::{
    conv2d, conv2d_group, conv2d_wrapper, elemwise_act_model_vector_mult,
    elemwise_secret_shared_vector_mult, matmul_2d,
};
pub use local::{secret_add, secret_mult, secret_sub};
pub use nonlinear::{
    arg_max, avg_pool, elemwise_vector_public_div, floor, max_pool, relu, scale_down, scale_up,
};

/// Copy the leading `out.len()` elements of `result` into `out`, reduced into `domain`.
fn write_output(domain: &Domain, result: &[u64], out: &mut [u64]) {
    assert!(result.len() >= out.len(), "result shorter than output");
    out.copy_from_slice(&result[..out.len()]);
    domain.mask_in_place(out);
}
