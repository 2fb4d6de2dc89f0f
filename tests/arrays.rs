use fraktal_core::{Access, ArrayDesc, Engine, EngineConfig, Error, Format, HostBuffer, HostData};

fn engine() -> Engine {
    Engine::with_config(EngineConfig {
        worker_threads: 2,
        ..EngineConfig::default()
    })
    .unwrap()
}

#[test]
fn float_round_trip_scenario() {
    let engine = engine();
    let array = engine
        .create_array(
            ArrayDesc::new(2, 2, 1, Format::Float32, Access::ReadWrite),
            Some(HostData::F32(&[0.0, 1.0, 2.0, 3.0])),
        )
        .unwrap();
    assert_eq!(engine.array_size(array).unwrap(), (2, 2));
    assert_eq!(engine.array_channels(array).unwrap(), 1);
    assert_eq!(engine.array_format(array).unwrap(), Format::Float32);
    assert_eq!(
        engine.to_host(array).unwrap(),
        HostBuffer::F32(vec![0.0, 1.0, 2.0, 3.0])
    );
}

#[test]
fn uint8_round_trip_is_exact() {
    let engine = engine();
    let data: Vec<u8> = (0..=255).collect();
    let array = engine
        .create_array(
            ArrayDesc::new(8, 8, 4, Format::UInt8, Access::ReadOnly),
            Some(HostData::U8(&data)),
        )
        .unwrap();
    assert_eq!(engine.to_host(array).unwrap().as_u8().unwrap(), data.as_slice());
    assert_eq!(engine.array_access(array).unwrap(), Access::ReadOnly);
}

#[test]
fn zero_fills_every_element() {
    let engine = engine();
    for format in [Format::Float32, Format::UInt8] {
        let desc = ArrayDesc::new(3, 5, 2, format, Access::ReadWrite);
        let data = match format {
            Format::Float32 => engine.create_array(desc, Some(HostData::F32(&[7.5; 30]))),
            Format::UInt8 => engine.create_array(desc, Some(HostData::U8(&[9; 30]))),
        }
        .unwrap();
        engine.zero_array(data).unwrap();
        match engine.to_host(data).unwrap() {
            HostBuffer::F32(v) => assert_eq!(v, vec![0.0; 30]),
            HostBuffer::U8(v) => assert_eq!(v, vec![0; 30]),
        }
    }
}

#[test]
fn unseeded_arrays_start_zeroed() {
    let engine = engine();
    let array = engine
        .create_array(ArrayDesc::new(4, 0, 1, Format::Float32, Access::ReadWrite), None)
        .unwrap();
    assert_eq!(engine.array_size(array).unwrap(), (4, 0));
    assert_eq!(engine.to_host(array).unwrap().len(), 4);
}

#[test]
fn stale_handles_are_detected() {
    let engine = engine();
    let desc = ArrayDesc::new(1, 1, 1, Format::Float32, Access::ReadWrite);
    let array = engine.create_array(desc, None).unwrap();
    engine.destroy_array(array).unwrap();
    let reused = engine.create_array(desc, None).unwrap();
    assert_ne!(array, reused);
    assert!(matches!(engine.to_host(array), Err(Error::InvalidHandle("array"))));
    assert!(matches!(engine.destroy_array(array), Err(Error::InvalidHandle(_))));
    assert!(engine.to_host(reused).is_ok());
}

#[test]
fn device_budget_limits_allocation() {
    let engine = Engine::with_config(EngineConfig {
        max_device_bytes: 100,
        worker_threads: 1,
        ..EngineConfig::default()
    })
    .unwrap();
    let desc = ArrayDesc::new(5, 5, 1, Format::Float32, Access::ReadWrite);
    let first = engine.create_array(desc, None).unwrap();
    assert_eq!(engine.device_bytes(), 100);
    assert!(matches!(engine.create_array(desc, None), Err(Error::Allocation(_))));
    engine.destroy_array(first).unwrap();
    engine.create_array(desc, None).unwrap();
}

#[test]
fn unknown_format_tag_is_an_allocation_error() {
    assert!(matches!(Format::try_from(42), Err(Error::Allocation(_))));
    assert_eq!(Format::try_from(2).unwrap(), Format::Float32);
}

#[test]
fn ndarray_view_has_row_major_shape() {
    let engine = engine();
    let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let array = engine
        .create_array(
            ArrayDesc::new(3, 2, 2, Format::Float32, Access::ReadWrite),
            Some(HostData::F32(&data)),
        )
        .unwrap();
    let view = engine.to_ndarray(array).unwrap();
    assert_eq!(view.shape(), &[2, 3, 2]);
    assert_eq!(view[[1, 0, 1]], 7.0);
}
