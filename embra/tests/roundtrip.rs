//! End-to-end behavior of the public API: envelope sizes, error bounds,
//! rate targets, embedded prefixes, and layout reinterpretation.

use embra::{
    CancelToken, EngineKind, Mask, Pyramid, RateTarget, TransformType, calc_stats, compress,
    decompress,
};

/// A deterministic smooth-plus-texture test field.
fn test_field(dims: (usize, usize, usize), texture: f64) -> Vec<f64> {
    let (nx, ny, nz) = dims;
    (0..nx * ny * nz)
        .map(|i| {
            let x = (i % nx) as f64 / nx as f64;
            let y = ((i / nx) % ny) as f64 / ny as f64;
            let z = (i / (nx * ny)) as f64 / nz as f64;
            let smooth = (x * 5.3).sin() * (y * 3.9).cos() + (z * 2.8 + 0.4).sin();
            let noise = ((i as u64).wrapping_mul(2654435761) % 10000) as f64 / 10000.0 - 0.5;
            smooth + texture * noise
        })
        .collect()
}

#[test]
fn constant_field_produces_the_17_byte_envelope() {
    let dims = (12, 13, 15);
    let data = vec![4.332; 12 * 13 * 15];

    let stream = compress(
        data.clone(),
        dims,
        RateTarget::FixedPwe { tolerance: 1.2e-2 },
        EngineKind::Speck,
        None,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(stream.len(), 17);

    let recon = decompress(&stream, dims, EngineKind::Speck, None, &CancelToken::new()).unwrap();
    assert_eq!(recon, data);
}

#[test]
fn pwe_tolerance_holds_element_wise() {
    let dims = (64, 64, 41);
    let data = test_field(dims, 0.05);
    let tolerance = 1e-5;

    let stream = compress(
        data.clone(),
        dims,
        RateTarget::FixedPwe { tolerance },
        EngineKind::Speck,
        None,
        &CancelToken::new(),
    )
    .unwrap();

    let recon = decompress(&stream, dims, EngineKind::Speck, None, &CancelToken::new()).unwrap();

    let stats = calc_stats(&data, &recon);
    assert!(stats.linf <= tolerance, "max error {}", stats.linf);
}

#[test]
fn pwe_below_f32_epsilon_still_holds() {
    let dims = (32, 32, 21);
    let data = test_field(dims, 0.02);
    let tolerance = 2.9e-9;

    let stream = compress(
        data.clone(),
        dims,
        RateTarget::FixedPwe { tolerance },
        EngineKind::Speck,
        None,
        &CancelToken::new(),
    )
    .unwrap();

    let recon = decompress(&stream, dims, EngineKind::Speck, None, &CancelToken::new()).unwrap();

    let stats = calc_stats(&data, &recon);
    assert!(stats.linf <= tolerance, "max error {}", stats.linf);
}

#[test]
fn psnr_target_lands_near_the_target() {
    let dims = (64, 64, 64);
    let data = test_field(dims, 0.2);

    let stream = compress(
        data.clone(),
        dims,
        RateTarget::FixedPsnr { db: 40.0 },
        EngineKind::Speck,
        None,
        &CancelToken::new(),
    )
    .unwrap();

    let recon = decompress(&stream, dims, EngineKind::Speck, None, &CancelToken::new()).unwrap();
    let stats = calc_stats(&data, &recon);

    assert!(
        stats.psnr >= 39.0 && stats.psnr <= 42.0,
        "psnr {}",
        stats.psnr
    );
}

#[test]
fn fixed_size_stream_is_embedded() {
    let dims = (48, 48, 48);
    let data = test_field(dims, 0.1);

    let stream = compress(
        data.clone(),
        dims,
        RateTarget::FixedPsnr { db: 80.0 },
        EngineKind::Speck,
        None,
        &CancelToken::new(),
    )
    .unwrap();

    // Every prefix decodes; quality never decreases with prefix length.
    let mut last_psnr = 0.0f64;
    for fraction in [16, 8, 4, 2, 1] {
        let cut = (stream.len() / fraction).max(32);
        let recon = decompress(
            &stream[..cut],
            dims,
            EngineKind::Speck,
            None,
            &CancelToken::new(),
        )
        .unwrap();

        let stats = calc_stats(&data, &recon);
        assert!(
            stats.psnr >= last_psnr - 0.01,
            "quality regressed at 1/{fraction}: {} -> {}",
            last_psnr,
            stats.psnr
        );
        last_psnr = stats.psnr;
    }
}

#[test]
fn byte_budget_bounds_the_stream() {
    let dims = (64, 64, 32);
    let data = test_field(dims, 0.3);
    let budget = 16 * 1024;

    let stream = compress(
        data.clone(),
        dims,
        RateTarget::FixedSize {
            budget_bytes: budget,
        },
        EngineKind::Speck,
        None,
        &CancelToken::new(),
    )
    .unwrap();

    assert!(stream.len() as u64 <= budget + 8, "{} bytes", stream.len());

    // The truncated-rate reconstruction is still usable.
    let recon = decompress(&stream, dims, EngineKind::Speck, None, &CancelToken::new()).unwrap();
    let stats = calc_stats(&data, &recon);
    assert!(stats.psnr > 20.0, "psnr {}", stats.psnr);
}

#[test]
fn tarp_engine_honors_the_tolerance() {
    let dims = (32, 32, 16);
    let data = test_field(dims, 0.05);
    let tolerance = 1e-4;

    let stream = compress(
        data.clone(),
        dims,
        RateTarget::FixedPwe { tolerance },
        EngineKind::tarp(),
        None,
        &CancelToken::new(),
    )
    .unwrap();

    let recon =
        decompress(&stream, dims, EngineKind::tarp(), None, &CancelToken::new()).unwrap();

    let stats = calc_stats(&data, &recon);
    assert!(stats.linf <= tolerance, "max error {}", stats.linf);
}

#[test]
fn masked_compression_round_trip() {
    let dims = (24, 24, 24);
    let data = test_field(dims, 0.02);
    let mask = Mask::from_fn(24, 24, 24, |x, y, z| {
        let dx = x as f64 - 11.5;
        let dy = y as f64 - 11.5;
        let dz = z as f64 - 11.5;
        dx * dx + dy * dy + dz * dz < 130.0
    })
    .unwrap();
    let tolerance = 1e-4;

    let stream = compress(
        data.clone(),
        dims,
        RateTarget::FixedPwe { tolerance },
        EngineKind::Speck,
        Some(&mask),
        &CancelToken::new(),
    )
    .unwrap();

    let recon = decompress(
        &stream,
        dims,
        EngineKind::Speck,
        Some(&mask),
        &CancelToken::new(),
    )
    .unwrap();

    for (i, (a, b)) in data.iter().zip(&recon).enumerate() {
        let (x, y, z) = (i % 24, (i / 24) % 24, i / (24 * 24));
        if mask.transparent(x, y, z) {
            assert_eq!(*b, 0.0, "transparent sample at {i} not zero");
        } else {
            assert!((a - b).abs() <= tolerance, "error at {i}");
        }
    }
}

#[test]
fn pyramid_geometry_of_a_17_cube() {
    let data = test_field((17, 17, 17), 0.0);
    let mut p = Pyramid::from_data(data, 17, 17, 17).unwrap();
    p.dwt(2).unwrap();

    assert_eq!(p.num_subbands(), 15);
    assert_eq!(p.subband_size(0), (5, 5, 5));
    assert_eq!(p.subband_origin(0), (0, 0, 0));
    assert_eq!(p.subband_size(7), (4, 4, 4));

    let total: usize = (0..15)
        .map(|s| {
            let (x, y, z) = p.subband_size(s);
            x * y * z
        })
        .sum();
    assert_eq!(total, 17 * 17 * 17);
}

#[test]
fn packet_reinterpretation_round_trips_bit_exactly() {
    let data = test_field((32, 32, 16), 0.1);
    let mut p = Pyramid::from_data(data, 32, 32, 16).unwrap();
    p.dwt(1).unwrap();
    let dyadic = p.data().to_vec();

    p.dyadic_to_packet(1, 1).unwrap();
    assert_eq!(p.transform_type(), TransformType::Packet);
    p.packet_to_dyadic(1).unwrap();

    assert_eq!(p.data(), dyadic.as_slice());
}

#[test]
fn images_compress_like_volumes() {
    let dims = (128, 96, 1);
    let data = test_field(dims, 0.1);
    let tolerance = 1e-3;

    let stream = compress(
        data.clone(),
        dims,
        RateTarget::FixedPwe { tolerance },
        EngineKind::Speck,
        None,
        &CancelToken::new(),
    )
    .unwrap();

    let recon = decompress(&stream, dims, EngineKind::Speck, None, &CancelToken::new()).unwrap();
    let stats = calc_stats(&data, &recon);
    assert!(stats.linf <= tolerance);
}

#[test]
fn pyramid_files_round_trip() {
    use embra::io::{SampleFormat, read_pyramid, write_pyramid};

    let data = test_field((20, 12, 8), 0.2);
    let mut p = Pyramid::from_data(data, 20, 12, 8).unwrap();
    p.dwt(1).unwrap();

    let mut buf = Vec::new();
    write_pyramid(&p, SampleFormat::F64, &mut buf).unwrap();
    let read = read_pyramid(&mut buf.as_slice(), SampleFormat::F64).unwrap();

    assert_eq!(read.dims(), (20, 12, 8));
    assert_eq!(read.spatial_levels(), 1);
    assert_eq!(read.data(), p.data());
}
