use fraktal_core::{
    Access, ArrayDesc, ArrayHandle, Context, Engine, EngineConfig, Error, Filter, Format, HostData, KernelHandle,
    Wrap,
};

fn engine() -> Engine {
    Engine::with_config(EngineConfig {
        worker_threads: 4,
        max_loop_iterations: 10_000,
        ..EngineConfig::default()
    })
    .unwrap()
}

fn kernel(engine: &Engine, source: &str) -> KernelHandle {
    let link = engine.create_link();
    engine.add_link_data(link, source.as_bytes(), "kernel.glsl").unwrap();
    let kernel = engine.link_kernel(link).unwrap();
    engine.destroy_link(link).unwrap();
    kernel
}

fn floats(engine: &Engine, width: usize, height: usize, channels: usize, data: &[f32]) -> ArrayHandle {
    engine
        .create_array(
            ArrayDesc::new(width, height, channels, Format::Float32, Access::ReadWrite),
            Some(HostData::F32(data)),
        )
        .unwrap()
}

fn host(engine: &Engine, array: ArrayHandle) -> Vec<f32> {
    engine.to_host(array).unwrap().as_f32().unwrap().to_vec()
}

#[test]
fn run_without_kernel_fails() {
    let engine = engine();
    let target = floats(&engine, 1, 1, 1, &[0.0]);
    let mut ctx = Context::new(&engine);
    assert!(matches!(ctx.run(target), Err(Error::NoCurrentKernel)));
    ctx.use_kernel(Some(kernel(&engine, "out float o; void main() { o = 1.0; }"))).unwrap();
    ctx.use_kernel(None).unwrap();
    assert!(matches!(ctx.run(target), Err(Error::NoCurrentKernel)));
}

#[test]
fn runs_add_into_the_target() {
    let engine = engine();
    let k = kernel(
        &engine,
        "uniform float scale;\nout float o;\nvoid main() { o = scale * (gl_FragCoord.x - 0.5 + 2.0 * (gl_FragCoord.y - 0.5)); }",
    );
    let target = floats(&engine, 2, 2, 1, &[10.0, 10.0, 10.0, 10.0]);
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.set_param_1f(engine.param_offset(k, "scale").unwrap(), 1.0).unwrap();
    ctx.run(target).unwrap();
    assert_eq!(host(&engine, target), vec![10.0, 11.0, 12.0, 13.0]);
    ctx.run(target).unwrap();
    assert_eq!(host(&engine, target), vec![10.0, 12.0, 14.0, 16.0]);
}

#[test]
fn unset_parameters_read_as_zero() {
    let engine = engine();
    let k = kernel(&engine, "uniform vec2 bias; out vec2 o; void main() { o = bias + vec2(1.0); }");
    let target = floats(&engine, 3, 0, 2, &[0.0; 6]);
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.run(target).unwrap();
    assert_eq!(host(&engine, target), vec![1.0; 6]);
}

#[test]
fn uint8_targets_saturate() {
    let engine = engine();
    let k = kernel(&engine, "uniform float v; out float o; void main() { o = v; }");
    let target = engine
        .create_array(
            ArrayDesc::new(2, 1, 1, Format::UInt8, Access::ReadWrite),
            Some(HostData::U8(&[0, 200])),
        )
        .unwrap();
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.set_param_1f(engine.param_offset(k, "v").unwrap(), 0.5).unwrap();
    ctx.run(target).unwrap();
    assert_eq!(engine.to_host(target).unwrap().as_u8().unwrap(), &[128, 255]);
}

#[test]
fn discard_leaves_elements_alone() {
    let engine = engine();
    let k = kernel(&engine, "out float o; void main() { if (gl_FragCoord.x > 1.0) discard; o = 1.0; }");
    let target = floats(&engine, 3, 1, 1, &[5.0, 5.0, 5.0]);
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.run(target).unwrap();
    assert_eq!(host(&engine, target), vec![6.0, 5.0, 5.0]);
}

#[test]
fn read_only_target_is_rejected() {
    let engine = engine();
    let k = kernel(&engine, "out float o; void main() { o = 1.0; }");
    let target = engine
        .create_array(ArrayDesc::new(1, 1, 1, Format::Float32, Access::ReadOnly), None)
        .unwrap();
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    assert!(matches!(ctx.run(target), Err(Error::ReadOnlyArray)));
}

#[test]
fn texel_fetch_reads_bound_array() {
    let engine = engine();
    let k = kernel(
        &engine,
        r#"
uniform sampler2D src;
uniform float gain;
out vec4 o;
void main() {
    ivec2 p = ivec2(gl_FragCoord.xy);
    o = texelFetch(src, ivec2(p.x, 1 - p.y), 0) * gain;
}
"#,
    );
    let source = engine
        .create_array(
            ArrayDesc::new(2, 2, 1, Format::UInt8, Access::ReadOnly),
            Some(HostData::U8(&[0, 51, 102, 255])),
        )
        .unwrap();
    let target = floats(&engine, 2, 2, 4, &[0.0; 16]);
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.set_param_array(engine.param_offset(k, "src").unwrap(), 2, source).unwrap();
    ctx.set_param_1f(engine.param_offset(k, "gain").unwrap(), 2.0).unwrap();
    ctx.run(target).unwrap();

    let out = host(&engine, target);
    let red: Vec<f32> = out.chunks(4).map(|px| px[0]).collect();
    assert_eq!(red, vec![0.8, 2.0, 0.0, 0.4]);
    assert!(out.chunks(4).all(|px| px[1] == 0.0 && px[3] == 2.0));
}

#[test]
fn unbound_sampler_reads_opaque_black() {
    let engine = engine();
    let k = kernel(&engine, "uniform sampler2D s; out vec4 o; void main() { o = texture(s, vec2(0.5)); }");
    let target = floats(&engine, 1, 1, 4, &[0.0; 4]);
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.run(target).unwrap();
    assert_eq!(host(&engine, target), vec![0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn sampling_honours_wrap_and_filter() {
    let engine = engine();
    let k = kernel(
        &engine,
        "uniform sampler1D s; uniform float u; out float o; void main() { o = texture(s, u).r; }",
    );
    let source = engine
        .create_array(
            ArrayDesc::new(2, 0, 1, Format::Float32, Access::ReadOnly),
            Some(HostData::F32(&[1.0, 3.0])),
        )
        .unwrap();
    let u = engine.param_offset(k, "u").unwrap();
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.set_param_array(engine.param_offset(k, "s").unwrap(), 0, source).unwrap();

    let sample_at = |ctx: &mut Context, at: f32| {
        let target = floats(&engine, 1, 0, 1, &[0.0]);
        ctx.set_param_1f(u, at).unwrap();
        ctx.run(target).unwrap();
        host(&engine, target)[0]
    };

    assert_eq!(sample_at(&mut ctx, 1.25), 3.0);
    engine
        .set_array_sampling(source, Wrap::Repeat, Filter::Nearest)
        .unwrap();
    assert_eq!(sample_at(&mut ctx, 1.25), 1.0);
    engine
        .set_array_sampling(source, Wrap::ClampToEdge, Filter::Linear)
        .unwrap();
    assert_eq!(sample_at(&mut ctx, 0.5), 2.0);
}

#[test]
fn sampler_dimension_mismatch_is_an_execution_error() {
    let engine = engine();
    let k = kernel(&engine, "uniform sampler2D s; out float o; void main() { o = texture(s, vec2(0.0)).r; }");
    let line = engine
        .create_array(ArrayDesc::new(4, 0, 1, Format::Float32, Access::ReadOnly), None)
        .unwrap();
    let target = floats(&engine, 1, 1, 1, &[0.0]);
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.set_param_array(engine.param_offset(k, "s").unwrap(), 0, line).unwrap();
    assert!(matches!(ctx.run(target), Err(Error::Execution(_))));
}

#[test]
fn runaway_loops_are_stopped() {
    let engine = engine();
    let k = kernel(&engine, "out float o; void main() { while (true) { o += 1.0; } }");
    let target = floats(&engine, 1, 1, 1, &[0.0]);
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    let err = ctx.run(target).unwrap_err();
    assert!(matches!(err, Error::Execution(ref m) if m.contains("10000")), "{err}");
    assert_eq!(host(&engine, target), vec![0.0]);
}

#[test]
fn contexts_keep_separate_bindings() {
    let engine = engine();
    let k = kernel(&engine, "uniform float v; out float o; void main() { o = v; }");
    let v = engine.param_offset(k, "v").unwrap();
    let mut a = Context::new(&engine);
    let mut b = Context::new(&engine);
    a.use_kernel(Some(k)).unwrap();
    b.use_kernel(Some(k)).unwrap();
    a.set_param_1f(v, 1.0).unwrap();
    b.set_param_1f(v, 5.0).unwrap();

    let target = floats(&engine, 1, 1, 1, &[0.0]);
    a.run(target).unwrap();
    b.run(target).unwrap();
    assert_eq!(host(&engine, target), vec![6.0]);
}

#[test]
fn matrix_parameters_transform_vectors() {
    let engine = engine();
    let k = kernel(&engine, "uniform mat4 m; out vec4 o; void main() { o = m * vec4(1.0, 2.0, 3.0, 1.0); }");
    let m = engine.param_offset(k, "m").unwrap();
    // row-major translation by (10, 20, 30)
    let rows = [
        1.0, 0.0, 0.0, 10.0, //
        0.0, 1.0, 0.0, 20.0, //
        0.0, 0.0, 1.0, 30.0, //
        0.0, 0.0, 0.0, 1.0,
    ];
    let target = floats(&engine, 1, 1, 4, &[0.0; 4]);
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.set_param_matrix4f(m, &rows, true).unwrap();
    ctx.run(target).unwrap();
    assert_eq!(host(&engine, target), vec![11.0, 22.0, 33.0, 1.0]);
}

#[test]
fn long_operator_chains_compile_and_run() {
    let engine = engine();
    let chain = vec!["1.0"; 200].join(" + ");
    let k = kernel(&engine, &format!("out float o; void main() {{ o = {chain}; }}"));
    let target = floats(&engine, 2, 1, 1, &[0.0, 0.0]);
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.run(target).unwrap();
    assert_eq!(host(&engine, target), vec![200.0, 200.0]);
}

#[test]
fn linear_sampling_at_extreme_coordinates() {
    let engine = engine();
    let k = kernel(
        &engine,
        "uniform sampler2D s; uniform vec2 at; out float o; void main() { o = texture(s, at).r; }",
    );
    let source = engine
        .create_array(
            ArrayDesc::new(2, 2, 1, Format::Float32, Access::ReadOnly),
            Some(HostData::F32(&[0.0, 1.0, 2.0, 3.0])),
        )
        .unwrap();
    let at = engine.param_offset(k, "at").unwrap();
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(k)).unwrap();
    ctx.set_param_array(engine.param_offset(k, "s").unwrap(), 0, source).unwrap();

    for wrap in [Wrap::Repeat, Wrap::ClampToEdge] {
        engine.set_array_sampling(source, wrap, Filter::Linear).unwrap();
        for (u, v) in [(1e30, 0.5), (-1e30, -1e30), (0.5, 1e30)] {
            let target = floats(&engine, 1, 1, 1, &[0.0]);
            ctx.set_param_2f(at, u, v).unwrap();
            ctx.run(target).unwrap();
            assert!(host(&engine, target)[0].is_finite());
        }
    }

    // clamped far corner is the last texel
    let target = floats(&engine, 1, 1, 1, &[0.0]);
    ctx.set_param_2f(at, 1e30, 1e30).unwrap();
    ctx.run(target).unwrap();
    assert_eq!(host(&engine, target), vec![3.0]);

    // non-finite coordinates still return a result rather than aborting
    let target = floats(&engine, 1, 1, 1, &[0.0]);
    ctx.set_param_2f(at, f32::INFINITY, f32::NAN).unwrap();
    ctx.run(target).unwrap();
}
