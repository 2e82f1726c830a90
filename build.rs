use tonic_build::manual::{Builder, Method, Service};

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(input)
        .output_type(output)
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    // Messages are hand-written prost structs in src/proto, so only the
    // service glue is generated here and no protoc is needed.
    let backup = Service::builder()
        .name("BackupService")
        .package("inventory.backup")
        .method(method(
            "export_lightweight",
            "ExportLightweight",
            "crate::proto::backup::ExportRequest",
            "crate::proto::backup::ExportResponse",
        ))
        .method(method(
            "export_full",
            "ExportFull",
            "crate::proto::backup::ExportRequest",
            "crate::proto::backup::ExportResponse",
        ))
        .method(method(
            "import_lightweight",
            "ImportLightweight",
            "crate::proto::backup::ImportRequest",
            "crate::proto::backup::ImportResponse",
        ))
        .method(method(
            "import_full",
            "ImportFull",
            "crate::proto::backup::ImportRequest",
            "crate::proto::backup::ImportResponse",
        ))
        .build();

    let health = Service::builder()
        .name("Health")
        .package("grpc.health.v1")
        .method(method(
            "check",
            "Check",
            "crate::proto::health::HealthCheckRequest",
            "crate::proto::health::HealthCheckResponse",
        ))
        .build();

    Builder::new()
        .build_client(false)
        .compile(&[backup, health]);

    println!("cargo:rerun-if-changed=build.rs");
}
