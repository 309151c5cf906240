//! Built-in tools, registered under module `builtin`.

mod clock;
mod context;
mod llm;
mod math;
mod messaging;
mod search;
mod storage;
mod text;

use std::sync::Arc;

use serde_json::{Map, Value};
use toolhub_core::{ToolFailure, ToolHandler};

use crate::{Collaborators, FactoryCatalog};

pub use clock::{Clock, DATE_FORMAT, TIME_FORMAT};
pub use context::WhoAmI;
pub use llm::{Complete, Embed, FollowUp};
pub use math::Add;
pub use messaging::Publish;
pub use search::Query;
pub use storage::{DeleteObject, GetObject, ListObjects, PutObject};
pub use text::Echo;

/// Module reference of every built-in factory.
pub const MODULE: &str = "builtin";

fn handler<T: ToolHandler + 'static>(tool: T) -> Arc<dyn ToolHandler> {
    Arc::new(tool)
}

/// Register every built-in factory.
pub fn register_all(catalog: &mut FactoryCatalog) {
    catalog.register(MODULE, "math.Add", |_, _| Ok(handler(Add)));
    catalog.register(MODULE, "text.Echo", |_, _| Ok(handler(Echo)));
    catalog.register(MODULE, "context.WhoAmI", |_, _| Ok(handler(WhoAmI)));
    catalog.register(MODULE, "clock.Today", |s, _| {
        Ok(handler(Clock::today(clock::offset_setting(s)?)))
    });
    catalog.register(MODULE, "clock.Now", |s, _| {
        Ok(handler(Clock::now(clock::offset_setting(s)?)))
    });

    catalog.register(MODULE, "storage.GetObject", |s, c| {
        Ok(handler(GetObject::new(store(c)?, prefix(s)?)))
    });
    catalog.register(MODULE, "storage.PutObject", |s, c| {
        Ok(handler(PutObject::new(store(c)?, prefix(s)?)))
    });
    catalog.register(MODULE, "storage.ListObjects", |s, c| {
        Ok(handler(ListObjects::new(store(c)?, prefix(s)?)))
    });
    catalog.register(MODULE, "storage.DeleteObject", |s, c| {
        Ok(handler(DeleteObject::new(store(c)?, prefix(s)?)))
    });

    catalog.register(MODULE, "search.Query", |s, c| {
        let index = Collaborators::require(c.search.as_ref(), "search index")?;
        let top = uint_setting(s, "top")?.unwrap_or(search::DEFAULT_TOP);
        Ok(handler(Query::new(index, top)))
    });

    catalog.register(MODULE, "llm.Complete", |s, c| {
        let completer = Collaborators::require(c.completer.as_ref(), "completion")?;
        Ok(handler(Complete::new(completer, str_setting(s, "system")?)))
    });
    catalog.register(MODULE, "llm.Embed", |_, c| {
        let embedder = Collaborators::require(c.embedder.as_ref(), "embedding")?;
        Ok(handler(Embed::new(embedder)))
    });
    catalog.register(MODULE, "llm.FollowUp", |s, c| {
        let completer = Collaborators::require(c.completer.as_ref(), "completion")?;
        let count = uint_setting(s, "count")?.unwrap_or(1);
        Ok(handler(FollowUp::new(completer, count)))
    });

    catalog.register(MODULE, "messaging.Publish", |s, c| {
        let publisher = Collaborators::require(c.publisher.as_ref(), "message bus")?;
        Ok(handler(Publish::new(publisher, str_setting(s, "topic")?)))
    });
}

fn store(c: &Collaborators) -> Result<Arc<dyn toolhub_connectors::ObjectStore>, String> {
    Collaborators::require(c.object_store.as_ref(), "object store")
}

fn prefix(settings: &Map<String, Value>) -> Result<String, String> {
    Ok(str_setting(settings, "prefix")?.unwrap_or_default())
}

fn str_setting(settings: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match settings.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(format!("settings.{key} must be a string, got {other}")),
    }
}

fn uint_setting(settings: &Map<String, Value>, key: &str) -> Result<Option<usize>, String> {
    match settings.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .map(Some)
            .ok_or_else(|| format!("settings.{key} must be a positive integer, got {value}")),
    }
}

/// String argument that the schema has already made present.
fn arg_str<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, ToolFailure> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolFailure::new(format!("argument {name} must be a string")))
}
