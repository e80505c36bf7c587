//! Generated Meshtastic protobuf types.
//!
//! `build.rs` compiles the `protos/meshtastic` subset with prost when the
//! `meshtastic-proto` feature is enabled. Only the device adapter touches these
//! types; the relay core works on [`crate::relay::transport::InboundPacket`].

#[cfg(feature = "meshtastic-proto")]
pub mod meshtastic_generated {
    // prost emits one file per package (meshtastic.rs); most of it is unused here.
    #[allow(dead_code, unused_imports, unused_variables, unused_mut, unused_macros)]
    #[allow(clippy::all)]
    #[allow(rustdoc::invalid_html_tags)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtastic.rs"));
    }
    pub use inner::*;
}
