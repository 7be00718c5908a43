use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use seclayer::metrics::OpKind;
use seclayer::ops;
use seclayer::plaintext;
use seclayer::private_test_utils::{
    from_signed, in_memory_sessions, init_tracing, reconstruct, share, share_model, to_signed,
};
use seclayer::reshape::{ConvParams, Padding};
use seclayer::{BackendKind, SessionContext};

fn assert_verified(client: &SessionContext) {
    assert!(!client.verification_log().is_empty());
    for record in client.verification_log() {
        assert!(record.passed, "{} failed at {:?}", record.op, record.mismatches);
    }
}

fn random_values(modulus: u64, len: usize, rng: &mut ChaCha12Rng) -> Vec<u64> {
    (0..len).map(|_| rng.gen_range(0..modulus)).collect()
}

#[tokio::test]
async fn conv_of_ones() -> anyhow::Result<()> {
    let _guard = init_tracing();
    for backend in [BackendKind::Ring, BackendKind::Field, BackendKind::Cheetah] {
        let (mut server, mut client) = in_memory_sessions(backend, 32, 2, true).await?;
        let domain = *server.domain();
        let params = ConvParams {
            n: 1,
            h: 4,
            w: 4,
            ci: 1,
            fh: 2,
            fw: 2,
            co: 1,
            pad: Padding::default(),
            stride_h: 1,
            stride_w: 1,
        };
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let (x0, x1) = share(&domain, &[1; 16], &mut rng);
        let (f0, f1) = share_model(&[1; 4]);
        let mut out0 = vec![0; params.output_len()];
        let mut out1 = vec![0; params.output_len()];
        tokio::try_join!(
            ops::conv2d_wrapper(&mut server, &params, &x0, &f0, &mut out0),
            ops::conv2d_wrapper(&mut client, &params, &x1, &f1, &mut out1)
        )?;
        assert_eq!(reconstruct(&domain, &out0, &out1), [4; 9], "{backend:?}");
        assert!(out0.iter().chain(&out1).all(|&v| v < domain.modulus()));
        assert_eq!(client.layer_counters().get(OpKind::Conv), 1);
        assert_verified(&client);
    }
    Ok(())
}

#[tokio::test]
async fn strided_padded_conv() -> anyhow::Result<()> {
    let (mut server, mut client) = in_memory_sessions(BackendKind::Ring, 24, 3, true).await?;
    let domain = *server.domain();
    let params = ConvParams {
        n: 2,
        h: 5,
        w: 6,
        ci: 3,
        fh: 3,
        fw: 2,
        co: 4,
        pad: Padding {
            top: 1,
            bottom: 0,
            left: 2,
            right: 1,
        },
        stride_h: 2,
        stride_w: 3,
    };
    let mut rng = ChaCha12Rng::seed_from_u64(2);
    let input = random_values(1 << 8, params.input_len(), &mut rng);
    let filter = random_values(1 << 8, params.filter_len(), &mut rng);
    let (x0, x1) = share(&domain, &input, &mut rng);
    let (f0, f1) = share_model(&filter);
    let mut out0 = vec![0; params.output_len()];
    let mut out1 = vec![0; params.output_len()];
    tokio::try_join!(
        ops::conv2d_wrapper(&mut server, &params, &x0, &f0, &mut out0),
        ops::conv2d_wrapper(&mut client, &params, &x1, &f1, &mut out1)
    )?;
    assert_eq!(
        reconstruct(&domain, &out0, &out1),
        plaintext::conv2d(&domain, &params, &input, &filter)
    );
    assert_verified(&client);
    Ok(())
}

#[tokio::test]
async fn grouped_conv_in_ring() -> anyhow::Result<()> {
    let (mut server, mut client) = in_memory_sessions(BackendKind::Ring, 32, 2, true).await?;
    let domain = *server.domain();
    let groups = 2;
    let params = ConvParams {
        n: 1,
        h: 4,
        w: 4,
        ci: 4,
        fh: 3,
        fw: 3,
        co: 6,
        pad: Padding::uniform(1),
        stride_h: 1,
        stride_w: 1,
    };
    let mut rng = ChaCha12Rng::seed_from_u64(3);
    let input = random_values(1 << 10, params.input_len(), &mut rng);
    let filter = random_values(1 << 10, params.group(groups).filter_len() * groups, &mut rng);
    let (x0, x1) = share(&domain, &input, &mut rng);
    let (f0, f1) = share_model(&filter);
    let mut out0 = vec![0; params.output_len()];
    let mut out1 = vec![0; params.output_len()];
    tokio::try_join!(
        ops::conv2d_group(&mut server, &params, groups, &x0, &f0, &mut out0),
        ops::conv2d_group(&mut client, &params, groups, &x1, &f1, &mut out1)
    )?;
    assert_eq!(
        reconstruct(&domain, &out0, &out1),
        plaintext::conv2d_group(&domain, &params, groups, &input, &filter)
    );
    assert_verified(&client);
    Ok(())
}

#[tokio::test]
#[should_panic(expected = "Grouped conv not implemented in HE")]
async fn grouped_conv_in_field_panics() {
    let (mut server, mut client) = in_memory_sessions(BackendKind::Field, 32, 1, false)
        .await
        .unwrap();
    let params = ConvParams {
        n: 1,
        h: 2,
        w: 2,
        ci: 2,
        fh: 1,
        fw: 1,
        co: 2,
        pad: Padding::default(),
        stride_h: 1,
        stride_w: 1,
    };
    let input = vec![0; params.input_len()];
    let filter = vec![0; 2];
    let mut out0 = vec![0; params.output_len()];
    let mut out1 = vec![0; params.output_len()];
    let _ = tokio::join!(
        ops::conv2d_group(&mut server, &params, 2, &input, &filter, &mut out0),
        ops::conv2d_group(&mut client, &params, 2, &input, &filter, &mut out1)
    );
}

async fn shared_matmul(
    threads: usize,
    backend: BackendKind,
    model_is_a: bool,
) -> anyhow::Result<Vec<u64>> {
    let (mut server, mut client) = in_memory_sessions(backend, 32, threads, false).await?;
    let domain = *server.domain();
    let (s1, s2, s3) = (3, 13, 5);
    let mut rng = ChaCha12Rng::seed_from_u64(4);
    let a = random_values(1 << 12, s1 * s2, &mut rng);
    let b = random_values(1 << 12, s2 * s3, &mut rng);
    let ((a0, a1), (b0, b1)) = if model_is_a {
        (share_model(&a), share(&domain, &b, &mut rng))
    } else {
        (share(&domain, &a, &mut rng), share_model(&b))
    };
    let mut c0 = vec![0; s1 * s3];
    let mut c1 = vec![0; s1 * s3];
    tokio::try_join!(
        ops::matmul_2d(&mut server, (s1, s2, s3), &a0, &b0, &mut c0, model_is_a),
        ops::matmul_2d(&mut client, (s1, s2, s3), &a1, &b1, &mut c1, model_is_a)
    )?;
    let c = reconstruct(&domain, &c0, &c1);
    assert_eq!(c, plaintext::matmul(&domain, s1, s2, s3, &a, &b));
    Ok(c)
}

#[tokio::test]
async fn matmul_independent_of_thread_count() -> anyhow::Result<()> {
    for backend in [BackendKind::Ring, BackendKind::Field] {
        for model_is_a in [true, false] {
            let single = shared_matmul(1, backend, model_is_a).await?;
            for threads in [2, 4] {
                assert_eq!(
                    shared_matmul(threads, backend, model_is_a).await?,
                    single,
                    "{backend:?} with {threads} threads"
                );
            }
        }
    }
    Ok(())
}

#[tokio::test]
#[should_panic(expected = "non-model party's share of the model operand must be zero")]
async fn nonzero_model_share_panics() {
    let (mut server, mut client) = in_memory_sessions(BackendKind::Ring, 32, 1, false)
        .await
        .unwrap();
    let a = [1, 2, 3, 4];
    let client_model = [0, 0, 1, 0];
    let mut c0 = [0; 4];
    let mut c1 = [0; 4];
    let _ = tokio::join!(
        ops::matmul_2d(&mut server, (2, 2, 2), &a, &a, &mut c0, true),
        ops::matmul_2d(&mut client, (2, 2, 2), &client_model, &a, &mut c1, true)
    );
}

#[tokio::test]
async fn elementwise_products() -> anyhow::Result<()> {
    for backend in [BackendKind::Ring, BackendKind::Field] {
        let (mut server, mut client) = in_memory_sessions(backend, 32, 4, true).await?;
        let domain = *server.domain();
        let x = from_signed(&domain, &[-3, 7, 0, 12, -100, 5, 1]);
        let y = from_signed(&domain, &[4, -2, 9, 3, 3, -5, 1]);
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let (x0, x1) = share(&domain, &x, &mut rng);
        let (m0, m1) = share_model(&y);
        let mut out0 = vec![0; x.len()];
        let mut out1 = vec![0; x.len()];
        tokio::try_join!(
            ops::elemwise_act_model_vector_mult(&mut server, &x0, &m0, &mut out0),
            ops::elemwise_act_model_vector_mult(&mut client, &x1, &m1, &mut out1)
        )?;
        let expected = [-12, -14, 0, 36, -300, -25, 1];
        assert_eq!(to_signed(&domain, &reconstruct(&domain, &out0, &out1)), expected);

        let (y0, y1) = share(&domain, &y, &mut rng);
        tokio::try_join!(
            ops::elemwise_secret_shared_vector_mult(&mut server, &x0, &y0, &mut out0),
            ops::elemwise_secret_shared_vector_mult(&mut client, &x1, &y1, &mut out1)
        )?;
        assert_eq!(to_signed(&domain, &reconstruct(&domain, &out0, &out1)), expected);
        assert_eq!(client.layer_counters().get(OpKind::BatchNorm), 2);
        assert_verified(&client);
    }
    Ok(())
}

#[tokio::test]
async fn local_share_arithmetic() -> anyhow::Result<()> {
    for backend in [BackendKind::Ring, BackendKind::Field] {
        let (server, client) = in_memory_sessions(backend, 16, 1, false).await?;
        let domain = *server.domain();
        let mut rng = ChaCha12Rng::seed_from_u64(30);
        let x = from_signed(&domain, &[5, -9, 300, 0]);
        let y = from_signed(&domain, &[-2, -9, 12, 7]);
        let (x0, x1) = share(&domain, &x, &mut rng);
        let (y0, y1) = share(&domain, &y, &mut rng);
        let (mut s0, mut s1) = (vec![0; 4], vec![0; 4]);
        let (mut d0, mut d1) = (vec![0; 4], vec![0; 4]);
        let (mut m0, mut m1) = (vec![0; 4], vec![0; 4]);
        for (ctx, x, y, sum, diff, prod) in [
            (&server, &x0, &y0, &mut s0, &mut d0, &mut m0),
            (&client, &x1, &y1, &mut s1, &mut d1, &mut m1),
        ] {
            ops::secret_add(ctx, x, y, sum);
            ops::secret_sub(ctx, x, y, diff);
            ops::secret_mult(ctx, x, -3, prod);
        }
        let open = |a: &[u64], b: &[u64]| to_signed(&domain, &reconstruct(&domain, a, b));
        assert_eq!(open(&s0, &s1), [3, -18, 312, 7], "{backend:?}");
        assert_eq!(open(&d0, &d1), [7, 0, 288, -7], "{backend:?}");
        assert_eq!(open(&m0, &m1), [-15, 27, -900, 0], "{backend:?}");
    }
    Ok(())
}
