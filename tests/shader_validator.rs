use fluidx::shaders::{self, EmbeddedKernels, KernelSource};

fn parse(name: &str) -> naga::Module {
    let source = EmbeddedKernels.load(name).unwrap();
    match naga::front::wgsl::parse_str(&source) {
        Ok(module) => module,
        Err(e) => panic!("failed to parse {name}.wgsl:\n{}", e.emit_to_string(&source)),
    }
}

#[test]
fn validate_all_shaders() {
    let mut errors = Vec::new();
    for name in shaders::ALL {
        let module = parse(name);
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        if let Err(e) = validator.validate(&module) {
            errors.push(format!("failed to validate {name}.wgsl:\n{e:?}"));
        }
    }
    if !errors.is_empty() {
        panic!("Shader validation failed:\n{}", errors.join("\n"));
    }
}

#[test]
fn entry_points_match_pipelines() {
    let expected: [(&str, &[&str]); 8] = [
        (shaders::ADVECT, &["main"]),
        (shaders::PROJECT_2D, &["main"]),
        (shaders::PROJECT_3D, &["main"]),
        (shaders::PARTICLE_UPDATE, &["main"]),
        (shaders::PARTICLE, &["vs_main", "fs_main"]),
        (shaders::SCREEN_QUAD, &["vs_main"]),
        (shaders::RAY_CAST, &["fs_main"]),
        (shaders::VISUALIZE_COLOR, &["fs_main"]),
    ];
    for (name, entry_points) in expected {
        let module = parse(name);
        let found: Vec<&str> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(found, entry_points, "entry points of {name}.wgsl");
    }
}

#[test]
fn per_frame_block_matches_host_layout() {
    // Every kernel that declares the per-frame block must agree on its size.
    for name in [
        shaders::ADVECT,
        shaders::PROJECT_2D,
        shaders::PROJECT_3D,
        shaders::PARTICLE_UPDATE,
        shaders::PARTICLE,
    ] {
        let module = parse(name);
        let (_, ty) = module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some("PerFrame"))
            .unwrap_or_else(|| panic!("{name}.wgsl has no PerFrame"));
        let naga::TypeInner::Struct { span, .. } = &ty.inner else {
            panic!("PerFrame in {name}.wgsl is not a struct");
        };
        assert_eq!(*span as usize, std::mem::size_of::<fluidx::params::PerFrameParams>(), "{name}.wgsl");
    }
}
