// Wire messages for the gRPC(-Web) surface. Service traits and servers are
// generated by build.rs.

pub mod backup {
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ExportRequest {}

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ExportResponse {
        #[prost(bool, tag = "1")]
        pub success: bool,
        /// JSON document, or base64 archive for ExportFull
        #[prost(string, tag = "2")]
        pub data: String,
        #[prost(string, tag = "3")]
        pub filename: String,
        #[prost(string, tag = "4")]
        pub error: String,
        #[prost(string, tag = "5")]
        pub error_kind: String,
        #[prost(map = "string, uint64", tag = "6")]
        pub counts: HashMap<String, u64>,
        #[prost(uint64, tag = "7")]
        pub assets: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ImportRequest {
        /// JSON document, or base64 archive for ImportFull
        #[prost(string, tag = "1")]
        pub data: String,
        #[prost(bool, tag = "2")]
        pub wipe_first: bool,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RestoreSummary {
        #[prost(string, tag = "1")]
        pub mode: String,
        #[prost(string, repeated, tag = "2")]
        pub wiped: Vec<String>,
        #[prost(map = "string, uint64", tag = "3")]
        pub written: HashMap<String, u64>,
        #[prost(uint64, tag = "4")]
        pub skipped_users: u64,
        #[prost(uint64, tag = "5")]
        pub assets_restored: u64,
        #[prost(uint64, tag = "6")]
        pub assets_ignored: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ImportResponse {
        #[prost(bool, tag = "1")]
        pub success: bool,
        #[prost(message, optional, tag = "2")]
        pub summary: Option<RestoreSummary>,
        #[prost(string, tag = "3")]
        pub error: String,
        #[prost(string, tag = "4")]
        pub error_kind: String,
    }

    include!(concat!(env!("OUT_DIR"), "/inventory.backup.BackupService.rs"));
}

pub mod health {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct HealthCheckRequest {
        #[prost(string, tag = "1")]
        pub service: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct HealthCheckResponse {
        #[prost(enumeration = "health_check_response::ServingStatus", tag = "1")]
        pub status: i32,
    }

    pub mod health_check_response {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum ServingStatus {
            Unknown = 0,
            Serving = 1,
            NotServing = 2,
            ServiceUnknown = 3,
        }
    }

    include!(concat!(env!("OUT_DIR"), "/grpc.health.v1.Health.rs"));
}
