//! Topology-level events, dispatched through the event bus to registered
//! handlers. These mirror the connection/source/sink/module event family;
//! scheduling and zone-state events live alongside them in `smartx_core`
//! since they aren't part of the topology model proper.

use serde::{Deserialize, Serialize};

use crate::properties::Properties;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ModelEvent {
    ConnectionEstablished { source_port: i32, sink_port: i32 },
    ConnectionRemoved { source_port: i32, sink_port: i32 },
    SourceRemoved { source_port: i32, sink_port: i32 },
    SinkRemoved { sink_port: i32 },
    UnrecoverableSourceError { device: String, message: String },
    UnrecoverableSinkError { device: String, message: String },
    ModuleEvent {
        instance_name: String,
        type_name: String,
        properties: Properties,
    },
}
