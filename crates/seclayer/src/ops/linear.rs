//! Matrix products, convolutions and elementwise products.
use super::write_output;
use crate::errors::ProtocolError;
use crate::metrics::OpKind;
use crate::plaintext;
use crate::reshape::{self, ConvParams};
use crate::session::SessionContext;
use crate::telemetry::LayerShape;
use crate::verify::verify;
use tracing::info;

/// `C = A * B` for `A: s1 x s2` and `B: s2 x s3`. The model operand (`A` if `model_is_a`) is
/// held by the server, the client's share of it must be zero.
///
/// The inner dimension is split across the worker instances of the session.
#[tracing::instrument(level = "debug", skip(ctx, a, b, out))]
pub async fn matmul_2d(
    ctx: &mut SessionContext,
    (s1, s2, s3): (usize, usize, usize),
    a: &[u64],
    b: &[u64],
    out: &mut [u64],
    model_is_a: bool,
) -> Result<(), ProtocolError> {
    assert_eq!(a.len(), s1 * s2, "A length");
    assert_eq!(b.len(), s2 * s3, "B length");
    assert_eq!(out.len(), s1 * s3, "C length");
    ctx.assert_model_share_zero(if model_is_a { a } else { b });
    info!(s1, s2, s3, "MatMul called");

    let guard = ctx.begin_op(OpKind::MatMul);
    let result = ctx
        .backend
        .matmul(&mut ctx.instances, (s1, s2, s3), a, b, model_is_a)
        .await?;
    let domain = *ctx.domain();
    write_output(&domain, &result, out);
    ctx.finish_op(guard, Some(LayerShape::MatMul { s1, s2, s3 }));

    if ctx.verification_enabled() {
        let record = verify(&mut ctx.instances[0], "MatMul", &[a, b], out, 0, |inputs| {
            plaintext::matmul(&domain, s1, s2, s3, &inputs[0], &inputs[1])
        })
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}

/// Convolution of an NHWC input with a `[FH][FW][CI][CO]` filter held by the server. Not
/// counted as a layer, see [`conv2d_wrapper`].
pub async fn conv2d(
    ctx: &mut SessionContext,
    params: &ConvParams,
    input: &[u64],
    filter: &[u64],
    out: &mut [u64],
) -> Result<(), ProtocolError> {
    assert_eq!(input.len(), params.input_len(), "input length");
    assert_eq!(filter.len(), params.filter_len(), "filter length");
    assert_eq!(out.len(), params.output_len(), "output length");
    ctx.assert_model_share_zero(filter);
    let result = ctx
        .backend
        .conv2d(&mut ctx.instances, params, input, filter)
        .await?;
    let domain = *ctx.domain();
    write_output(&domain, &result, out);
    Ok(())
}

/// [`conv2d`] accounted as a Conv layer.
#[tracing::instrument(level = "debug", skip(ctx, input, filter, out))]
pub async fn conv2d_wrapper(
    ctx: &mut SessionContext,
    params: &ConvParams,
    input: &[u64],
    filter: &[u64],
    out: &mut [u64],
) -> Result<(), ProtocolError> {
    info!(
        n = params.n,
        h = params.h,
        w = params.w,
        ci = params.ci,
        fh = params.fh,
        fw = params.fw,
        co = params.co,
        "Conv2D called"
    );
    let guard = ctx.begin_op(OpKind::Conv);
    conv2d(ctx, params, input, filter, out).await?;
    ctx.finish_op(guard, Some(LayerShape::Conv(*params)));

    if ctx.verification_enabled() {
        let domain = *ctx.domain();
        let record = verify(
            &mut ctx.instances[0],
            "Conv",
            &[input, filter],
            out,
            0,
            |inputs| plaintext::conv2d(&domain, params, &inputs[0], &inputs[1]),
        )
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}

/// Grouped convolution with a `[FH][FW][CI/G][CO]` filter. Each of the `groups` groups
/// convolves `CI/G` input channels into `CO/G` output channels.
///
/// # Panics
/// If the backend has no grouped convolution and `groups > 1`.
#[tracing::instrument(level = "debug", skip(ctx, input, filter, out))]
pub async fn conv2d_group(
    ctx: &mut SessionContext,
    params: &ConvParams,
    groups: usize,
    input: &[u64],
    filter: &[u64],
    out: &mut [u64],
) -> Result<(), ProtocolError> {
    if groups == 1 {
        return conv2d_wrapper(ctx, params, input, filter, out).await;
    }
    assert!(
        ctx.backend.supports_grouped_conv(),
        "Grouped conv not implemented in HE"
    );
    let group_params = params.group(groups);
    assert_eq!(input.len(), params.input_len(), "input length");
    assert_eq!(
        filter.len(),
        group_params.filter_len() * groups,
        "filter length"
    );
    assert_eq!(out.len(), params.output_len(), "output length");
    ctx.assert_model_share_zero(filter);
    info!(groups, ci = params.ci, co = params.co, "Conv2DGroup called");

    let guard = ctx.begin_op(OpKind::Conv);
    for g in 0..groups {
        let group_input = reshape::slice_input_group(params, groups, g, input);
        let group_filter = reshape::slice_filter_group(params, groups, g, filter);
        let group_out = ctx
            .backend
            .conv2d(&mut ctx.instances, &group_params, &group_input, &group_filter)
            .await?;
        reshape::scatter_group_output(params, groups, g, &group_out, out);
    }
    ctx.domain().mask_in_place(out);
    ctx.finish_op(guard, Some(LayerShape::Conv(*params)));

    if ctx.verification_enabled() {
        let domain = *ctx.domain();
        let record = verify(
            &mut ctx.instances[0],
            "Conv",
            &[input, filter],
            out,
            0,
            |inputs| plaintext::conv2d_group(&domain, params, groups, &inputs[0], &inputs[1]),
        )
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}

/// Elementwise product of a shared activation with a model vector held by the server. The
/// client's share of `model` must be zero.
#[tracing::instrument(level = "debug", skip(ctx, input, model, out), fields(size = input.len()))]
pub async fn elemwise_act_model_vector_mult(
    ctx: &mut SessionContext,
    input: &[u64],
    model: &[u64],
    out: &mut [u64],
) -> Result<(), ProtocolError> {
    let size = input.len();
    assert_eq!(model.len(), size, "model length");
    assert_eq!(out.len(), size, "output length");
    ctx.assert_model_share_zero(model);
    info!(size, "Fused BatchNorm with model vector called");

    let guard = ctx.begin_op(OpKind::BatchNorm);
    let result = ctx
        .backend
        .elemwise_model_mult(&mut ctx.instances, input, model)
        .await?;
    let domain = *ctx.domain();
    write_output(&domain, &result, out);
    ctx.finish_op(guard, Some(LayerShape::BatchNorm { size }));

    if ctx.verification_enabled() {
        let record = verify(
            &mut ctx.instances[0],
            "BatchNorm",
            &[input, model],
            out,
            0,
            |inputs| plaintext::hadamard(&domain, &inputs[0], &inputs[1]),
        )
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}

/// Elementwise product of two shared vectors.
#[tracing::instrument(level = "debug", skip(ctx, a, b, out), fields(size = a.len()))]
pub async fn elemwise_secret_shared_vector_mult(
    ctx: &mut SessionContext,
    a: &[u64],
    b: &[u64],
    out: &mut [u64],
) -> Result<(), ProtocolError> {
    let size = a.len();
    assert_eq!(b.len(), size, "operand length");
    assert_eq!(out.len(), size, "output length");
    info!(size, "Fused BatchNorm with shared vector called");

    let guard = ctx.begin_op(OpKind::BatchNorm);
    let result = ctx
        .backend
        .elemwise_shared_mult(&mut ctx.instances, a, b)
        .await?;
    let domain = *ctx.domain();
    write_output(&domain, &result, out);
    ctx.finish_op(guard, Some(LayerShape::BatchNorm { size }));

    if ctx.verification_enabled() {
        let record = verify(&mut ctx.instances[0], "BatchNorm", &[a, b], out, 0, |inputs| {
            plaintext::hadamard(&domain, &inputs[0], &inputs[1])
        })
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}
