use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fraktal_core::{Access, ArrayDesc, Context, Engine, Format, HostData};

const GRADIENT: &str = r#"
uniform vec2 size;
out vec4 color;
void main() {
    vec2 uv = gl_FragCoord.xy / size;
    color = vec4(uv, 0.5, 1.0);
}
"#;

const MANDELBROT: &str = r#"
uniform vec2 size;
uniform int iterations;
out float escape;
void main() {
    vec2 c = gl_FragCoord.xy / size * 3.0 - vec2(2.0, 1.5);
    vec2 z = vec2(0.0);
    int n = 0;
    for (int i = 0; i < iterations; i++) {
        if (dot(z, z) > 4.0) break;
        z = vec2(z.x * z.x - z.y * z.y, 2.0 * z.x * z.y) + c;
        n++;
    }
    escape = float(n) / float(iterations);
}
"#;

fn setup(source: &str, side: usize, channels: usize) -> (Engine, Context, fraktal_core::ArrayHandle) {
    let engine = Engine::new().unwrap();
    let link = engine.create_link();
    engine.add_link_data(link, source.as_bytes(), "bench.glsl").unwrap();
    let kernel = engine.link_kernel(link).unwrap();
    let target = engine
        .create_array(ArrayDesc::new(side, side, channels, Format::Float32, Access::ReadWrite), None)
        .unwrap();
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(kernel)).unwrap();
    ctx.set_param_2f(engine.param_offset(kernel, "size").unwrap(), side as f32, side as f32)
        .unwrap();
    if let Ok(iterations) = engine.param_offset(kernel, "iterations") {
        ctx.set_param_1i(iterations, 64).unwrap();
    }
    (engine, ctx, target)
}

fn bench_gradient(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_gradient");
    for side in [64, 256, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, &side| {
            let (engine, mut ctx, target) = setup(GRADIENT, side, 4);
            b.iter(|| {
                ctx.run(target).unwrap();
                black_box(engine.device_bytes());
            });
        });
    }
    group.finish();
}

fn bench_mandelbrot(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_mandelbrot");
    group.sample_size(20);
    for side in [64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, &side| {
            let (engine, mut ctx, target) = setup(MANDELBROT, side, 1);
            b.iter(|| {
                engine.zero_array(target).unwrap();
                ctx.run(target).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let engine = Engine::new().unwrap();
    c.bench_function("link_mandelbrot", |b| {
        b.iter(|| {
            let link = engine.create_link();
            engine.add_link_data(link, black_box(MANDELBROT.as_bytes()), "bench.glsl").unwrap();
            let kernel = engine.link_kernel(link).unwrap();
            engine.destroy_link(link).unwrap();
            engine.destroy_kernel(kernel).unwrap();
        });
    });
}

fn bench_readback(c: &mut Criterion) {
    let engine = Engine::new().unwrap();
    let data = vec![0.25f32; 512 * 512 * 4];
    let array = engine
        .create_array(
            ArrayDesc::new(512, 512, 4, Format::Float32, Access::ReadWrite),
            Some(HostData::F32(&data)),
        )
        .unwrap();
    c.bench_function("to_host_512", |b| b.iter(|| black_box(engine.to_host(array).unwrap())));
}

criterion_group!(benches, bench_gradient, bench_mandelbrot, bench_compile, bench_readback);
criterion_main!(benches);
