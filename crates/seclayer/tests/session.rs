use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use seclayer::errors::SessionError;
use seclayer::metrics::OpKind;
use seclayer::ops;
use seclayer::primitives::net::NetIo;
use seclayer::private_test_utils::{
    from_signed, init_tracing, reconstruct, session_pair, share, share_model, test_config,
    to_signed, TestChannel,
};
use seclayer::reshape::{ConvParams, Padding};
use seclayer::telemetry::{csv_header, CsvRowSink};
use seclayer::{BackendKind, Party, SessionConfig, SessionContext};

#[tokio::test]
async fn teardown_exchanges_reports() -> anyhow::Result<()> {
    let _guard = init_tracing();
    let config = test_config(BackendKind::Ring, 32, 2);
    let (mut server, mut client) = session_pair(config, TestChannel::InMemory).await?;
    let domain = *server.domain();
    let mut rng = ChaCha12Rng::seed_from_u64(20);

    let (a0, a1) = share_model(&from_signed(&domain, &[1, 2, 3, 4, 5, 6]));
    let (b0, b1) = share(&domain, &from_signed(&domain, &[1, -1, 2, -2, 3, -3]), &mut rng);
    let mut c0 = vec![0; 4];
    let mut c1 = vec![0; 4];
    tokio::try_join!(
        ops::matmul_2d(&mut server, (2, 3, 2), &a0, &b0, &mut c0, true),
        ops::matmul_2d(&mut client, (2, 3, 2), &a1, &b1, &mut c1, true)
    )?;
    assert_eq!(
        to_signed(&domain, &reconstruct(&domain, &c0, &c1)),
        [14, -14, 32, -32]
    );
    let mut r0 = vec![0; 4];
    let mut r1 = vec![0; 4];
    tokio::try_join!(
        ops::relu(&mut server, &c0, &mut r0, 0, false),
        ops::relu(&mut client, &c1, &mut r1, 0, false)
    )?;
    assert_eq!(
        to_signed(&domain, &reconstruct(&domain, &r0, &r1)),
        [14, 0, 32, 0]
    );

    let (server_report, client_report) = tokio::try_join!(server.end(), client.end())?;
    assert_eq!(server_report.party, Party::SERVER);
    assert_eq!(server_report.backend, "Ring-OT-SCI_OT");
    assert!(client_report.peer.is_none());
    let peer = server_report.peer.as_ref().expect("server receives client report");
    assert_eq!(peer, &client_report.comm);
    assert_eq!(
        server_report.combined_bytes_sent(),
        server_report.comm.total_bytes_sent + client_report.comm.total_bytes_sent
    );
    for report in [&server_report, &client_report] {
        assert_eq!(report.layer_counts[&OpKind::MatMul], 1);
        assert_eq!(report.layer_counts[&OpKind::Relu], 1);
        assert_eq!(report.layer_counts[&OpKind::Conv], 0);
        assert!(report.avg_power.is_empty());
        let relu = &report.comm.per_op[&OpKind::Relu];
        assert_eq!(relu.calls, 1);
        assert!(relu.bytes_sent > 0);
        assert!(relu.rounds > 0);
    }
    serde_json::to_string(&server_report)?;
    Ok(())
}

#[tokio::test]
async fn tcp_session() -> anyhow::Result<()> {
    let _guard = init_tracing();
    let config = SessionConfig {
        verify: true,
        ..test_config(BackendKind::Cheetah, 37, 2)
    };
    let (mut server, mut client) = session_pair(config, TestChannel::Tcp).await?;
    let domain = *server.domain();
    let mut rng = ChaCha12Rng::seed_from_u64(21);
    let x = from_signed(&domain, &[-50, 40, -30, 20, -10, 0, 10, 20, 30]);
    let (x0, x1) = share(&domain, &x, &mut rng);
    let mut out0 = vec![0; x.len()];
    let mut out1 = vec![0; x.len()];
    tokio::try_join!(
        ops::relu(&mut server, &x0, &mut out0, 0, false),
        ops::relu(&mut client, &x1, &mut out1, 0, false)
    )?;
    assert_eq!(
        to_signed(&domain, &reconstruct(&domain, &out0, &out1)),
        [0, 40, 0, 20, 0, 0, 10, 20, 30]
    );
    assert!(client.verification_log()[0].passed);
    assert!(server.verification_log().is_empty());
    tokio::try_join!(server.end(), client.end())?;
    Ok(())
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let config = test_config(BackendKind::Ring, 64, 1);
    let (io, _) = NetIo::new_in_memory_pair();
    assert!(matches!(
        SessionContext::start(config, vec![io]).await,
        Err(SessionError::InvalidConfig(_))
    ));

    let config = test_config(BackendKind::Field, 32, 2);
    let (io, _) = NetIo::new_in_memory_pair();
    assert!(matches!(
        SessionContext::start(config, vec![io]).await,
        Err(SessionError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn disconnected_peer_is_an_error() {
    let config = test_config(BackendKind::Ring, 32, 1);
    let (io, remote) = NetIo::new_in_memory_pair();
    drop(remote);
    assert!(matches!(
        SessionContext::start(config, vec![io]).await,
        Err(SessionError::Protocol(_))
    ));
}

#[tokio::test]
async fn layer_telemetry_rows() -> anyhow::Result<()> {
    let _guard = init_tracing();
    let dir = tempfile::tempdir()?;
    let power_file = dir.path().join("power");
    std::fs::write(&power_file, "2000000\n")?;
    let csv_dir = dir.path().join("server");
    let config = SessionConfig {
        power_sample_path: Some(power_file),
        power_sample_interval_ms: 5,
        ..test_config(BackendKind::Ring, 32, 1)
    };
    let (mut server, mut client) = session_pair(config, TestChannel::InMemory).await?;
    server.set_row_sink(Box::new(CsvRowSink::new(&csv_dir)));
    let domain = *server.domain();

    let params = ConvParams {
        n: 1,
        h: 3,
        w: 3,
        ci: 1,
        fh: 2,
        fw: 2,
        co: 2,
        pad: Padding::default(),
        stride_h: 1,
        stride_w: 1,
    };
    let mut rng = ChaCha12Rng::seed_from_u64(22);
    let (x0, x1) = share(&domain, &[1; 9], &mut rng);
    let (f0, f1) = share_model(&[1; 8]);
    let mut out0 = vec![0; params.output_len()];
    let mut out1 = vec![0; params.output_len()];
    for _ in 0..2 {
        tokio::try_join!(
            ops::conv2d_wrapper(&mut server, &params, &x0, &f0, &mut out0),
            ops::conv2d_wrapper(&mut client, &params, &x1, &f1, &mut out1)
        )?;
    }
    // scale_down has no layer shape and writes no rows
    tokio::try_join!(
        ops::scale_down(&mut server, &mut out0, 1),
        ops::scale_down(&mut client, &mut out1, 1)
    )?;
    assert_eq!(reconstruct(&domain, &out0, &out1), [2; 8]);

    let (server_report, _) = tokio::try_join!(server.end(), client.end())?;
    assert!(server_report.avg_power[&OpKind::Conv] >= 2.0);
    assert_eq!(server_report.avg_power[&OpKind::MaxPool], 0.0);

    let csv = std::fs::read_to_string(csv_dir.join("conv_output.csv"))?;
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some(csv_header(OpKind::Conv).as_str()));
    let rows: Vec<&str> = lines.collect();
    assert!(rows.len() >= 2);
    assert!(rows[0].starts_with("0,Conv,1,"));
    assert!(rows.iter().any(|row| row.contains(",Conv,2,")));
    assert!(rows.iter().all(|row| row.ends_with(",1,3,3,1,2,2,2,0,0,0,0,1,1")));
    assert!(rows.iter().all(|row| row.split(',').nth(4) == Some("2")));
    assert_eq!(std::fs::read_dir(&csv_dir)?.count(), 1);
    Ok(())
}
