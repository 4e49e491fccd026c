use quickjs_rusty::JsCompiledFunction;

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::context::{self, Function};
pub use crate::context::ScriptOutput;
use crate::{Error, catch_handler, try_run_and_catch};

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum Script {
    Function { args: Option<Value>, code: String },
    CompiledFunction { args: Option<Value>, name: String },
}

enum Message {
    ExecuteScript {
        script: Script,
        respond_to: tokio::sync::oneshot::Sender<Result<ScriptOutput, Error>>,
    },
}

pub struct RuntimeConfig {
    pub workers: usize,
    pub functions: Option<HashMap<String, String>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            functions: Some(HashMap::new()),
        }
    }
}

/// Pool of worker threads, each owning its own JavaScript context.
///
/// A panic while a worker runs a script is reported back as that script's
/// error; the worker keeps serving.
#[derive(Clone)]
pub struct Runtime {
    sender: crossbeam::channel::Sender<Message>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let (sender, receiver) = crossbeam::channel::unbounded::<Message>();

        let functions = config.functions.unwrap_or_default();

        for _ in 0..config.workers {
            let receiver = receiver.clone();
            let functions = functions.clone();
            Runtime::spawn_worker(receiver, functions)
        }

        Self { sender }
    }

    fn spawn_worker(
        receiver: crossbeam::channel::Receiver<Message>,
        functions: HashMap<String, String>,
    ) {
        std::thread::spawn(move || {
            log::debug!("spawn worker: {:?}", std::thread::current().id());

            let init = catch_handler(
                |err| log::error!("worker initialization panicked: {}", err),
                || {
                    let context = context::init()?;
                    let compiled_fns = context::compile_functions(&context, functions)?;
                    Ok::<_, Error>((context, compiled_fns))
                },
            );

            let (context, compiled_fns) = match init {
                Some(Ok(init)) => init,
                Some(Err(err)) => {
                    log::error!("failed to initialize runtime context: {}", err);
                    return;
                }
                None => return,
            };

            while let Ok(msg) = receiver.recv() {
                match msg {
                    Message::ExecuteScript { script, respond_to } => {
                        log::trace!("execute script");

                        let msg = try_run_and_catch(|| {
                            let (args, source) = Runtime::prepare_script(script, &compiled_fns)?;
                            context::eval(&context, args, source)
                        });

                        _ = respond_to.send(msg.map_err(Error::detach));
                    }
                };
            }
        });
    }

    fn prepare_script(
        script: Script,
        compiled_fns: &HashMap<String, JsCompiledFunction>,
    ) -> Result<(Option<Value>, Function), Error> {
        match script {
            Script::Function { args, code } => Ok((args, Function::Code(code))),
            Script::CompiledFunction { args, name } => {
                let function = compiled_fns
                    .get(&name)
                    .ok_or(Error::Unexpected(format!("function {} not found", name)))?
                    .to_owned();

                Ok((args, Function::Compiled(function)))
            }
        }
    }

    pub async fn execute_script(&self, script: Script) -> Result<ScriptOutput, Error> {
        let (sender, receiver) = tokio::sync::oneshot::channel::<Result<ScriptOutput, Error>>();

        let msg = Message::ExecuteScript {
            script,
            respond_to: sender,
        };

        _ = self.sender.send(msg);

        receiver
            .await
            .map_err(|e| Error::Unexpected(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn init_logger() {
        _ = env_logger::builder().is_test(true).try_init();
    }

    #[tokio::test]
    async fn sum() {
        init_logger();
        let runtime = Runtime::new(RuntimeConfig::default());
        let res = runtime
            .execute_script(Script::Function {
                code: "console.log('test'); 1 + 1".into(),
                args: None,
            })
            .await
            .unwrap();

        assert_eq!(res.output, "2");
        assert_eq!(res.console_output, "test\n");

        let res = runtime
            .execute_script(Script::Function {
                code: "console.log('test2'); 2 + 2".into(),
                args: None,
            })
            .await
            .unwrap();

        assert_eq!(res.output, "4");
        assert_eq!(res.console_output, "test2\n");
    }

    #[tokio::test]
    async fn ctx() {
        let runtime = Runtime::new(RuntimeConfig::default());
        let res = runtime
            .execute_script(Script::Function {
                code: "let obj = {name: ctx.name, args}; JSON.stringify(obj);".into(),
                args: Some(json!(["a", "b"])),
            })
            .await
            .unwrap();

        assert_eq!(res.output, "{\"name\":\"script\",\"args\":[\"a\",\"b\"]}");
    }

    #[tokio::test]
    async fn compile() {
        let runtime = Runtime::new(RuntimeConfig {
            functions: Some(HashMap::from([("sum.js".into(), "args.a+args.b".into())])),
            ..Default::default()
        });
        let res = runtime
            .execute_script(Script::CompiledFunction {
                name: "sum.js".into(),
                args: Some(json!({"a": 1, "b": 1})),
            })
            .await
            .unwrap();

        assert_eq!(res.output, "2");
    }

    #[tokio::test]
    async fn unknown_function() {
        let runtime = Runtime::new(RuntimeConfig {
            workers: 1,
            ..Default::default()
        });
        let err = runtime
            .execute_script(Script::CompiledFunction {
                name: "missing.js".into(),
                args: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Unexpected(msg) if msg == "function missing.js not found"));
    }

    #[tokio::test]
    async fn script_exception() {
        let runtime = Runtime::new(RuntimeConfig {
            workers: 1,
            ..Default::default()
        });
        let err = runtime
            .execute_script(Script::Function {
                code: "throw new Error('from script')".into(),
                args: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Exception(msg) if msg == "Error: from script"));
    }

    #[tokio::test]
    async fn failed_init_drops_worker() {
        init_logger();
        let runtime = Runtime::new(RuntimeConfig {
            workers: 1,
            functions: Some(HashMap::from([("broken.js".into(), "let = ;".into())])),
        });

        let err = runtime
            .execute_script(Script::Function {
                code: "1".into(),
                args: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Unexpected(_)));
    }

    #[test]
    fn worker_keeps_serving_after_error() {
        init_logger();
        let (sender, receiver) = crossbeam::channel::unbounded::<Message>();
        Runtime::spawn_worker(receiver, HashMap::new());

        let send = |script: Script| {
            let (respond_to, reply) = tokio::sync::oneshot::channel();
            sender
                .send(Message::ExecuteScript { script, respond_to })
                .unwrap();
            reply.blocking_recv().unwrap()
        };

        let err = send(Script::Function {
            code: "undefinedFn()".into(),
            args: None,
        })
        .unwrap_err();
        assert!(matches!(err, Error::Exception(msg) if msg.starts_with("ReferenceError")));

        let res = send(Script::Function {
            code: "3 * 3".into(),
            args: None,
        })
        .unwrap();
        assert_eq!(res.output, "9");
    }
}
