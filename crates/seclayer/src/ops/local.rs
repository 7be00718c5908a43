//! Operations on shares which need no interaction.
use crate::session::SessionContext;

/// Shares of `x + y`.
pub fn secret_add(ctx: &SessionContext, x: &[u64], y: &[u64], out: &mut [u64]) {
    assert_eq!(x.len(), y.len(), "operand lengths");
    assert_eq!(out.len(), x.len(), "output length");
    let domain = ctx.domain();
    for ((o, &a), &b) in out.iter_mut().zip(x).zip(y) {
        *o = domain.add(a, b);
    }
}

/// Shares of `x - y`.
pub fn secret_sub(ctx: &SessionContext, x: &[u64], y: &[u64], out: &mut [u64]) {
    assert_eq!(x.len(), y.len(), "operand lengths");
    assert_eq!(out.len(), x.len(), "output length");
    let domain = ctx.domain();
    for ((o, &a), &b) in out.iter_mut().zip(x).zip(y) {
        *o = domain.sub(a, b);
    }
}

/// Shares of `x * c` for a public `c` given in the signed interpretation.
pub fn secret_mult(ctx: &SessionContext, x: &[u64], c: i64, out: &mut [u64]) {
    assert_eq!(out.len(), x.len(), "output length");
    let domain = ctx.domain();
    let c = domain.from_signed(c);
    for (o, &a) in out.iter_mut().zip(x) {
        *o = domain.mul(a, c);
    }
}
