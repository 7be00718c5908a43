//! ReLU, pooling, arg max and fixed point scaling.
use super::write_output;
use crate::errors::ProtocolError;
use crate::metrics::OpKind;
use crate::plaintext;
use crate::reshape::{self, pad_to_alignment, PoolParams};
use crate::session::SessionContext;
use crate::telemetry::LayerShape;
use crate::verify::verify;
use tracing::info;

/// `max(x, 0)`, followed by a division by `2^sf` if `do_truncation` is set and `sf > 0`.
#[tracing::instrument(level = "debug", skip(ctx, input, out), fields(size = input.len()))]
pub async fn relu(
    ctx: &mut SessionContext,
    input: &[u64],
    out: &mut [u64],
    sf: u32,
    do_truncation: bool,
) -> Result<(), ProtocolError> {
    let size = input.len();
    assert_eq!(out.len(), size, "output length");
    let truncate = do_truncation && sf > 0;
    info!(size, sf, truncate, "Relu called");
    let domain = *ctx.domain();

    let guard = ctx.begin_op(OpKind::Relu);
    let padded = pad_to_alignment(input);
    let mut relu_out = ctx.backend.relu(&mut ctx.instances, &padded).await?;
    if truncate {
        let trunc_guard = ctx.begin_op(OpKind::Truncation);
        let truncated = ctx
            .backend
            .truncate(&mut ctx.instances, &relu_out, sf, true)
            .await?;
        ctx.finish_op(trunc_guard, None);
        write_output(&domain, &truncated, out);
        if ctx.verification_enabled() {
            relu_out.truncate(size);
            domain.mask_in_place(&mut relu_out);
        }
    } else {
        write_output(&domain, &relu_out, out);
    }
    ctx.finish_op(guard, Some(LayerShape::Relu { size }));

    if ctx.verification_enabled() {
        let relu_shares: &[u64] = if truncate { &relu_out } else { out };
        let record = verify(&mut ctx.instances[0], "ReLU", &[input], relu_shares, 0, |inputs| {
            plaintext::relu(&domain, &inputs[0])
        })
        .await?;
        ctx.log_verification(record);
        if truncate {
            let tolerance = ctx.backend.truncation_tolerance();
            let record = verify(
                &mut ctx.instances[0],
                "Truncation",
                &[input],
                out,
                tolerance,
                |inputs| plaintext::scale_down(&domain, &plaintext::relu(&domain, &inputs[0]), sf),
            )
            .await?;
            ctx.log_verification(record);
        }
    }
    Ok(())
}

#[tracing::instrument(level = "debug", skip(ctx, input, out))]
pub async fn max_pool(
    ctx: &mut SessionContext,
    params: &PoolParams,
    input: &[u64],
    out: &mut [u64],
) -> Result<(), ProtocolError> {
    assert_eq!(input.len(), params.input_len(), "input length");
    assert_eq!(out.len(), params.output_len(), "output length");
    info!(
        n = params.n,
        h = params.img_h,
        w = params.img_w,
        c = params.c,
        ksize_h = params.ksize_h,
        ksize_w = params.ksize_w,
        "MaxPool called"
    );
    let guard = ctx.begin_op(OpKind::MaxPool);
    let windows = reshape::extract_pooling_windows(params, input);
    let max = ctx.backend.max_rows(&mut ctx.instances, &windows).await?;
    reshape::scatter_pool_output(params, &max, out);
    ctx.domain().mask_in_place(out);
    ctx.finish_op(guard, Some(LayerShape::MaxPool(*params)));

    if ctx.verification_enabled() {
        let domain = *ctx.domain();
        let record = verify(&mut ctx.instances[0], "MaxPool", &[input], out, 0, |inputs| {
            plaintext::max_pool(&domain, params, &inputs[0])
        })
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}

/// Average pooling, the window sum divided by `ksize_h * ksize_w` including padded positions.
#[tracing::instrument(level = "debug", skip(ctx, input, out))]
pub async fn avg_pool(
    ctx: &mut SessionContext,
    params: &PoolParams,
    input: &[u64],
    out: &mut [u64],
) -> Result<(), ProtocolError> {
    assert_eq!(input.len(), params.input_len(), "input length");
    assert_eq!(out.len(), params.output_len(), "output length");
    info!(
        n = params.n,
        h = params.img_h,
        w = params.img_w,
        c = params.c,
        ksize_h = params.ksize_h,
        ksize_w = params.ksize_w,
        "AvgPool called"
    );
    let guard = ctx.begin_op(OpKind::AvgPool);
    let windows = reshape::extract_pooling_windows(params, input);
    let sums = ctx.backend.window_sums(&windows);
    let avg = ctx
        .backend
        .div_public(&mut ctx.instances, &sums, params.window_len() as u64, false)
        .await?;
    reshape::scatter_pool_output(params, &avg, out);
    ctx.domain().mask_in_place(out);
    ctx.finish_op(guard, Some(LayerShape::AvgPool(*params)));

    if ctx.verification_enabled() {
        let domain = *ctx.domain();
        let record = verify(&mut ctx.instances[0], "AvgPool", &[input], out, 0, |inputs| {
            plaintext::avg_pool(&domain, params, &inputs[0])
        })
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}

/// Shares of the index of the first maximal element of a `1 x s2` input, written to `out[0]`.
///
/// # Panics
/// If `s1 != 1`.
#[tracing::instrument(level = "debug", skip(ctx, input, out))]
pub async fn arg_max(
    ctx: &mut SessionContext,
    s1: usize,
    s2: usize,
    input: &[u64],
    out: &mut [u64],
) -> Result<(), ProtocolError> {
    assert_eq!(s1, 1, "ArgMax is implemented for s1=1 only");
    assert_eq!(input.len(), s2, "input length");
    assert_eq!(out.len(), 1, "output length");
    info!(s1, s2, "ArgMax called");

    let guard = ctx.begin_op(OpKind::ArgMax);
    out[0] = ctx.backend.argmax(&mut ctx.instances[0], input).await?;
    ctx.domain().mask_in_place(out);
    ctx.finish_op(guard, Some(LayerShape::ArgMax { s1, s2 }));

    if ctx.verification_enabled() {
        let domain = *ctx.domain();
        let record = verify(&mut ctx.instances[0], "ArgMax", &[input], out, 0, |inputs| {
            vec![plaintext::argmax(&domain, &inputs[0])]
        })
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}

/// Divide `values` in place by `2^sf`, rounding towards negative infinity.
#[tracing::instrument(level = "debug", skip(ctx, values), fields(size = values.len()))]
pub async fn scale_down(
    ctx: &mut SessionContext,
    values: &mut [u64],
    sf: u32,
) -> Result<(), ProtocolError> {
    let input = values.to_vec();
    let guard = ctx.begin_op(OpKind::Truncation);
    let padded = pad_to_alignment(&input);
    let truncated = ctx
        .backend
        .truncate(&mut ctx.instances, &padded, sf, false)
        .await?;
    let domain = *ctx.domain();
    write_output(&domain, &truncated, values);
    ctx.finish_op(guard, None);

    if ctx.verification_enabled() {
        let tolerance = ctx.backend.truncation_tolerance();
        let record = verify(
            &mut ctx.instances[0],
            "ScaleDown",
            &[input.as_slice()],
            values,
            tolerance,
            |inputs| plaintext::scale_down(&domain, &inputs[0], sf),
        )
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}

/// Multiply `values` in place by `2^sf`. Local, no communication.
pub fn scale_up(ctx: &SessionContext, values: &mut [u64], sf: u32) {
    ctx.backend.scale_up(values, sf);
}

/// Signed floor division by a public divisor.
///
/// # Panics
/// If `divisor <= 0`.
#[tracing::instrument(level = "debug", skip(ctx, input, out), fields(size = input.len()))]
pub async fn elemwise_vector_public_div(
    ctx: &mut SessionContext,
    input: &[u64],
    divisor: i64,
    out: &mut [u64],
) -> Result<(), ProtocolError> {
    assert!(divisor > 0, "No support for division by a non-positive divisor");
    assert_eq!(out.len(), input.len(), "output length");
    let divisor = divisor as u64;
    let padded = pad_to_alignment(input);
    let result = ctx
        .backend
        .div_public(&mut ctx.instances, &padded, divisor, false)
        .await?;
    let domain = *ctx.domain();
    write_output(&domain, &result, out);

    if ctx.verification_enabled() {
        let record = verify(
            &mut ctx.instances[0],
            "ElemWiseVectorPublicDiv",
            &[input],
            out,
            0,
            |inputs| plaintext::div_public(&domain, &inputs[0], divisor),
        )
        .await?;
        ctx.log_verification(record);
    }
    Ok(())
}

/// # Panics
/// Always, floor of fixed point values is not supported.
pub fn floor(_ctx: &mut SessionContext, _input: &[u64], _out: &mut [u64], _sf: u32) {
    panic!("Floor is not implemented");
}
