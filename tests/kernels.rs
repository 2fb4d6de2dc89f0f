use std::io::Write;

use fraktal_core::{Context, Engine, EngineConfig, Error, KernelHandle, Type};

const PASSTHROUGH: &str = r#"
#version 150
uniform vec4 tint;
uniform float gain;
out vec4 color;

void main() {
    color = tint * gain;
}
"#;

fn engine() -> Engine {
    Engine::with_config(EngineConfig {
        worker_threads: 2,
        ..EngineConfig::default()
    })
    .unwrap()
}

fn compile(engine: &Engine, fragments: &[(&str, &str)]) -> fraktal_core::Result<KernelHandle> {
    let link = engine.create_link();
    for (name, source) in fragments {
        engine.add_link_data(link, source.as_bytes(), name)?;
    }
    let kernel = engine.link_kernel(link);
    engine.destroy_link(link)?;
    kernel
}

#[test]
fn minimal_kernel_exposes_exactly_its_parameters() {
    let engine = engine();
    let kernel = compile(&engine, &[("passthrough.glsl", PASSTHROUGH)]).unwrap();
    let params = engine.kernel_params(kernel).unwrap();
    let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["tint", "gain"]);
    assert_eq!(params[0].ty, Type::Vec(4));
    assert!(matches!(
        engine.param_offset(kernel, "color"),
        Err(Error::UnknownParameter(name)) if name == "color"
    ));
}

#[test]
fn param_offset_is_idempotent() {
    let engine = engine();
    let kernel = compile(&engine, &[("k", PASSTHROUGH)]).unwrap();
    let a = engine.param_offset(kernel, "gain").unwrap();
    let b = engine.param_offset(kernel, "gain").unwrap();
    assert_eq!(a, b);
    assert_ne!(a, engine.param_offset(kernel, "tint").unwrap());
}

#[test]
fn unresolved_symbol_fails_to_compile() {
    let engine = engine();
    let err = compile(
        &engine,
        &[("main.glsl", "float shade(vec2 p);\nout float o;\nvoid main() { o = shade(gl_FragCoord.xy); }")],
    )
    .unwrap_err();
    let Error::Compile(diagnostic) = err else {
        panic!("expected compile error, got {err:?}");
    };
    assert_eq!(diagnostic.fragment, "main.glsl");
    assert_eq!(diagnostic.line, 3);
    assert!(diagnostic.message.contains("shade"));
}

#[test]
fn later_fragments_resolve_earlier_prototypes() {
    let engine = engine();
    compile(
        &engine,
        &[
            ("decl", "float shade(vec2 p);\nout float o;\nvoid main() { o = shade(gl_FragCoord.xy); }"),
            ("impl", "float shade(vec2 p) { return p.x + p.y; }"),
        ],
    )
    .unwrap();
}

#[test]
fn recursion_is_rejected() {
    let engine = engine();
    let err = compile(&engine, &[("r", "int f(int n) { return n == 0 ? 0 : f(n - 1); }\nvoid main() { f(3); }")])
        .unwrap_err();
    assert!(matches!(err, Error::Compile(d) if d.message.contains("recursive")));
}

#[test]
fn syntax_errors_name_the_fragment() {
    let engine = engine();
    let err = compile(&engine, &[("ok", "uniform float a;"), ("broken", "void main( {}")]).unwrap_err();
    assert!(matches!(err, Error::Compile(d) if d.fragment == "broken" && d.line == 1));
}

#[test]
fn load_kernel_reads_a_file() {
    let engine = engine();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(PASSTHROUGH.as_bytes()).unwrap();
    let kernel = engine.load_kernel(file.path()).unwrap();
    assert!(engine.param_offset(kernel, "tint").is_ok());
    assert!(matches!(
        engine.load_kernel(file.path().with_extension("missing")),
        Err(Error::SourceNotFound { .. })
    ));
}

#[test]
fn compiling_twice_is_deterministic() {
    let engine = engine();
    let link = engine.create_link();
    engine.add_link_data(link, PASSTHROUGH.as_bytes(), "k").unwrap();
    let a = engine.link_kernel(link).unwrap();
    let b = engine.link_kernel(link).unwrap();
    assert_eq!(engine.kernel_params(a).unwrap(), engine.kernel_params(b).unwrap());
    assert!(matches!(engine.add_link_file(link, "/tmp/x.glsl"), Err(Error::LinkSealed)));
}

#[test]
fn identity_matrix_lands_column_major_in_binding_table() {
    let engine = engine();
    let kernel = compile(&engine, &[("m", "uniform mat4 view; void main() {}")]).unwrap();
    let offset = engine.param_offset(kernel, "view").unwrap();
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(kernel)).unwrap();

    let mut identity = [0.0f32; 16];
    for i in 0..4 {
        identity[i * 4 + i] = 1.0;
    }
    ctx.set_param_matrix4f(offset, &identity, false).unwrap();
    let expected: Vec<u8> = identity.iter().flat_map(|v| v.to_le_bytes()).collect();
    assert_eq!(&ctx.binding_bytes().unwrap()[..64], expected.as_slice());
}

#[test]
fn wrong_setter_shape_is_a_param_type_error() {
    let engine = engine();
    let kernel = compile(&engine, &[("k", PASSTHROUGH)]).unwrap();
    let tint = engine.param_offset(kernel, "tint").unwrap();
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(kernel)).unwrap();
    assert!(matches!(ctx.set_param_3f(tint, 1.0, 1.0, 1.0), Err(Error::ParamType { .. })));
    assert!(matches!(ctx.set_param_4i(tint, 1, 1, 1, 1), Err(Error::ParamType { .. })));
    ctx.set_param_4f(tint, 1.0, 1.0, 1.0, 1.0).unwrap();
}

#[test]
fn destroyed_kernel_goes_stale_in_context() {
    let engine = engine();
    let kernel = compile(&engine, &[("k", PASSTHROUGH)]).unwrap();
    let gain = engine.param_offset(kernel, "gain").unwrap();
    let mut ctx = Context::new(&engine);
    ctx.use_kernel(Some(kernel)).unwrap();
    engine.destroy_kernel(kernel).unwrap();
    assert!(matches!(ctx.set_param_1f(gain, 1.0), Err(Error::InvalidHandle("kernel"))));
    assert!(matches!(ctx.use_kernel(Some(kernel)), Err(Error::InvalidHandle(_))));
}

#[test]
fn link_fragment_limit_is_enforced() {
    let engine = Engine::with_config(EngineConfig {
        max_link_fragments: 2,
        worker_threads: 1,
        ..EngineConfig::default()
    })
    .unwrap();
    let link = engine.create_link();
    engine.add_link_data(link, b"uniform float a;", "a").unwrap();
    engine.add_link_data(link, b"void main() {}", "b").unwrap();
    assert!(matches!(
        engine.add_link_data(link, b"uniform float c;", "c"),
        Err(Error::LinkFull(2))
    ));
    engine.link_kernel(link).unwrap();
}

#[test]
fn deeply_nested_expressions_fail_to_compile() {
    let engine = engine();
    let parens = format!(
        "out float o;\nvoid main() {{ o = {}1.0{}; }}",
        "(".repeat(3000),
        ")".repeat(3000)
    );
    let err = compile(&engine, &[("parens.glsl", parens.as_str())]).unwrap_err();
    assert!(matches!(&err, Error::Compile(d) if d.message.contains("nested too deeply") && d.line == 2), "{err}");

    let chain = vec!["1.0"; 5000].join(" + ");
    let long = format!("out float o;\nvoid main() {{ o = {chain}; }}");
    let err = compile(&engine, &[("chain.glsl", long.as_str())]).unwrap_err();
    assert!(matches!(&err, Error::Compile(d) if d.message.contains("nested too deeply")), "{err}");
}

#[test]
fn expression_depth_is_configurable() {
    let engine = Engine::with_config(EngineConfig {
        max_expression_depth: 8,
        worker_threads: 1,
        ..EngineConfig::default()
    })
    .unwrap();
    let chain = vec!["1.0"; 12].join(" + ");
    let source = format!("out float o; void main() {{ o = {chain}; }}");
    assert!(matches!(compile(&engine, &[("k", source.as_str())]), Err(Error::Compile(_))));
    compile(&engine, &[("k", "out float o; void main() { o = 1.0 + 2.0; }")]).unwrap();
}
