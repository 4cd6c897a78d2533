#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use wme_script::{
    CallContext, ImageBuilder, NativeHandle, NativeObject, Registry, ScriptErrorReport, ScriptHost, ScriptId,
    Value,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds `builder` and starts it in `registry` as `filename`.
pub fn load(registry: &mut Registry, builder: &ImageBuilder, filename: &str) -> Result<ScriptId> {
    Ok(registry.load(builder.build()?, filename, None)?)
}

/// Steps one script until it stops running.
pub fn run(registry: &mut Registry, id: ScriptId, host: &mut dyn ScriptHost) -> usize {
    let mut steps = 0;
    while registry.step_script(id, host).is_some() {
        steps += 1;
        assert!(steps < 100_000, "script {id} does not stop");
    }
    steps
}

pub fn global(registry: &Registry, name: &str) -> Value {
    registry.globals().value(name).unwrap_or_default()
}

/// A host with a manual clock, a few externals, and a log of errors shown.
#[derive(Default)]
pub struct TestHost {
    pub time: u64,
    pub errors: Vec<ScriptErrorReport>,
}

impl TestHost {
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

fn render(v: &Value) -> String {
    if v.is_null() {
        "_".to_owned()
    } else {
        v.get_string()
    }
}

impl ScriptHost for TestHost {
    fn external_call(&mut self, call: &mut CallContext<'_, '_>, name: &str) -> Result<bool> {
        match name {
            "Join2" | "Join4" => {
                let n = if name == "Join2" { 2 } else { 4 };
                let args = call.args(n)?;
                let text = args.iter().map(render).collect::<Vec<_>>().join(",");
                call.push_return(Value::String(text));
            }
            "Explode" => {
                call.args(0)?;
                anyhow::bail!("engine refused");
            }
            "Refuse" => anyhow::bail!("engine refused"),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn live_time(&self) -> u64 {
        self.time
    }

    fn on_runtime_error(&mut self, report: &ScriptErrorReport) {
        self.errors.push(report.clone());
    }
}

/// A game object scripts can wait for and call methods on.
#[derive(Debug, Default)]
pub struct Door {
    pub ready: bool,
    pub valid: bool,
    pub knocks: i32,
    pub scripts: Vec<ScriptId>,
}

impl Door {
    pub fn new() -> Rc<RefCell<Door>> {
        Rc::new(RefCell::new(Door { valid: true, ..Door::default() }))
    }
}

pub fn handle(door: &Rc<RefCell<Door>>) -> NativeHandle {
    door.clone()
}

impl NativeObject for Door {
    fn class_name(&self) -> &str {
        "door"
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        match name {
            "Knocks" => Some(Value::Int(self.knocks)),
            _ => None,
        }
    }

    fn call_method(&mut self, call: &mut CallContext<'_, '_>, name: &str) -> Result<bool> {
        match name {
            "Knock" => {
                let args = call.args(1)?;
                self.knocks += args[0].get_int().max(1);
                call.push_return(Value::Int(self.knocks));
                Ok(true)
            }
            "Jam" => anyhow::bail!("door is jammed"),
            _ => Ok(false),
        }
    }

    fn scripts(&self) -> Vec<ScriptId> {
        self.scripts.clone()
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}
