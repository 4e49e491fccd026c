use quickjs_rusty::{
    Context, JsCompiledFunction, OwnedJsValue,
    console::{ConsoleBackend, Level},
    serde::to_js,
};

use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::{collections::HashMap, fmt::Write};

use super::*;

#[derive(Serialize, Debug)]
pub struct ScriptOutput {
    pub output: String,
    pub console_output: String,
}

#[derive(Debug)]
pub enum Function {
    Code(String),
    Compiled(JsCompiledFunction),
}

impl From<&str> for Function {
    fn from(value: &str) -> Self {
        Self::Code(value.into())
    }
}

pub struct Console {
    pub output: Arc<Mutex<String>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            output: Arc::new(Mutex::new(String::from(""))),
        }
    }

    /// Everything logged so far.
    pub fn contents(output: &Mutex<String>) -> String {
        output.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ConsoleBackend for Console {
    fn log(&self, _level: Level, values: Vec<OwnedJsValue>) {
        let output_line = values
            .into_iter()
            .map(|v| v.js_to_string().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(", ");
        log::debug!("{output_line}");
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        _ = writeln!(output, "{}", output_line);
    }
}

pub fn init() -> Result<Context, Error> {
    let context = Context::builder().console(Console::new()).build()?;

    let js_context = unsafe { context.context_raw() };

    let ctx = to_js(js_context, &json!({"name": "script"}))?;

    context.set_global("ctx", ctx)?;

    Ok(context)
}

pub fn compile_functions(
    context: &Context,
    functions: HashMap<String, String>,
) -> Result<HashMap<String, JsCompiledFunction>, Error> {
    let js_context = unsafe { context.context_raw() };

    let mut compiled_fns = HashMap::new();

    for (name, code) in functions.into_iter() {
        let compiled_fn = quickjs_rusty::compile::compile(js_context, &code, &name)?
            .try_into_compiled_function()?;

        compiled_fns.insert(name, compiled_fn);
    }

    Ok(compiled_fns)
}

pub fn eval<Args>(
    context: &Context,
    args: Option<Args>,
    source: Function,
) -> Result<ScriptOutput, Error>
where
    Args: Serialize,
{
    let console = Console::new();
    let output = console.output.clone();

    context.set_console(Box::new(console))?;

    let js_context = unsafe { context.context_raw() };

    let args = to_js(js_context, &args)?;
    context.set_global("args", args)?;

    let result = match source {
        Function::Code(code) => context.eval(&code, false)?,
        Function::Compiled(compiled_fn) => compiled_fn.eval()?,
    };
    let result = result.js_to_string()?;

    Ok(ScriptOutput {
        output: result,
        console_output: Console::contents(&output),
    })
}
