//
// script.rs
// Dicom-Transform-rs
//
// Lua script bridge: one sandboxed interpreter per worker, a fixed method table for the
// dataset façade, and translation of script failures into host errors.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;

use mlua::{
    Function, Lua, LuaOptions, StdLib, UserData, UserDataMethods, Value, Variadic,
};
use tracing::info;

use crate::error::{FacadeError, ScriptError};
use crate::facade::DatasetFacade;

/// Function every transform script must define.
pub const ENTRY_POINT: &str = "main";

const MEMORY_LIMIT: usize = 512 * 1024 * 1024;

/// Script text from the `--script` argument: the content of that file when it
/// exists, otherwise the argument itself as inline source.
pub fn read_script_source(arg: &str) -> std::io::Result<String> {
    let path = Path::new(arg);
    if path.is_file() {
        std::fs::read_to_string(path)
    } else {
        Ok(arg.to_string())
    }
}

/// A loaded transform script, owned by exactly one worker.
pub struct ScriptBridge {
    lua: Lua,
}

impl ScriptBridge {
    /// Create a sandboxed interpreter and run the script's top-level chunk.
    pub fn load(source: &str) -> Result<Self, ScriptError> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )
        .map_err(load_error)?;
        lua.set_memory_limit(MEMORY_LIMIT).map_err(load_error)?;

        register_host_functions(&lua).map_err(load_error)?;

        lua.load(source)
            .set_name("transform script")
            .exec()
            .map_err(load_error)?;

        Ok(Self { lua })
    }

    /// Fail unless the script defines a global function named `entry`.
    pub fn require_entry(&self, entry: &str) -> Result<(), ScriptError> {
        match self.lua.globals().get::<Value>(entry) {
            Ok(Value::Function(_)) => Ok(()),
            _ => Err(ScriptError::MissingEntry(entry.to_string())),
        }
    }

    /// Call `entry(facade)` synchronously.
    pub fn invoke(&self, entry: &str, facade: DatasetFacade) -> Result<(), ScriptError> {
        let function: Function = self
            .lua
            .globals()
            .get(entry)
            .map_err(|_| ScriptError::MissingEntry(entry.to_string()))?;

        function
            .call::<()>(facade)
            .map_err(|e| ScriptError::Invocation(e.to_string()))
    }
}

fn load_error(e: mlua::Error) -> ScriptError {
    ScriptError::Load(e.to_string())
}

/// `log(...)` and `print(...)` go to the diagnostic log; stdout is reserved for transformed paths.
fn register_host_functions(lua: &Lua) -> mlua::Result<()> {
    let log = lua.create_function(|_, parts: Variadic<Value>| {
        let message = parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.to_string_lossy().to_string(),
                Value::Nil => "nil".to_string(),
                Value::Boolean(b) => b.to_string(),
                Value::Integer(i) => i.to_string(),
                Value::Number(n) => n.to_string(),
                other => format!("<{}>", other.type_name()),
            })
            .collect::<Vec<_>>()
            .join(" ");
        info!(target: "script", "{message}");
        Ok(())
    })?;

    let globals = lua.globals();
    globals.set("log", log.clone())?;
    globals.set("print", log)?;
    Ok(())
}

fn lua_error(e: FacadeError) -> mlua::Error {
    mlua::Error::external(e)
}

/// The complete capability set scripts get; nothing else of the host is reachable.
impl UserData for DatasetFacade {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("get_string", |_, this, (group, element): (u16, u16)| {
            this.get_string(group, element).map_err(lua_error)
        });

        methods.add_method(
            "get_multiple_strings",
            |_, this, (group, element): (u16, u16)| {
                this.get_multiple_strings(group, element).map_err(lua_error)
            },
        );

        methods.add_method(
            "update_string",
            |_, this, (group, element, value): (u16, u16, String)| {
                this.update_string(group, element, &value).map_err(lua_error)
            },
        );

        methods.add_method("delete_tag", |_, this, (group, element): (u16, u16)| {
            this.delete_tag(group, element).map_err(lua_error)
        });

        methods.add_method("delete_group", |_, this, group: u16| {
            this.delete_group(group).map_err(lua_error)
        });

        methods.add_method("contains", |_, this, (group, element): (u16, u16)| {
            this.contains(group, element).map_err(lua_error)
        });

        methods.add_method("has_value", |_, this, (group, element): (u16, u16)| {
            this.has_value(group, element).map_err(lua_error)
        });

        methods.add_method(
            "count_sequence_items",
            |_, this, (group, element): (u16, u16)| {
                this.count_sequence_items(group, element).map_err(lua_error)
            },
        );

        methods.add_method(
            "get_sequence_item",
            |_, this, (group, element, index): (u16, u16, usize)| {
                this.get_sequence_item(group, element, index)
                    .map_err(lua_error)
            },
        );

        methods.add_method(
            "get_sequence_items",
            |_, this, (group, element): (u16, u16)| {
                this.get_sequence_items(group, element).map_err(lua_error)
            },
        );

        methods.add_method(
            "create_sequence_item",
            |_, this, (group, element): (u16, u16)| {
                this.create_sequence_item(group, element).map_err(lua_error)
            },
        );
    }
}
