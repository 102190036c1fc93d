use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::fmt;

/// TracingFactory 全局只初始化一次
static INIT: OnceCell<TracingFactoryOptions> = OnceCell::new();

#[derive(Debug, Clone, Default)]
pub struct TracingFactory {
    options: TracingFactoryOptions,
}

#[derive(Debug, Clone)]
pub struct TracingFactoryOptions {
    debug: bool,

    output_type: OutputType,

    level: Option<Level>,

    log_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OutputType {
    STDOUT,

    LOG,
}

impl TracingFactory {
    pub fn init_log(debug: bool) -> Self {
        TracingFactory::init_log_with_options(TracingFactoryOptions::new_with_debug(debug))
    }

    pub fn init_log_with_options(opt: TracingFactoryOptions) -> Self {
        let mut opts = opt.clone();

        let dir = match &opt.log_dir {
            None => {
                let path = String::from("/tmp/tablestream/logs");
                opts.log_dir = Some(path.clone());

                path
            }
            Some(dir) => dir.clone(),
        };

        let level = match opts.level {
            None => {
                if opts.debug {
                    Level::DEBUG
                } else {
                    Level::INFO
                }
            }
            Some(l) => l,
        };

        if INIT.get().is_none() {
            let builder = fmt()
                .with_max_level(level)
                .with_target(false)
                .with_thread_ids(true)
                .with_thread_names(true);

            let installed = match opts.output_type {
                OutputType::STDOUT => builder.compact().try_init().is_ok(),
                OutputType::LOG => {
                    let appender = rolling::daily(&dir, "tablestream.log");
                    builder
                        .with_writer(appender)
                        .with_ansi(false)
                        .compact()
                        .try_init()
                        .is_ok()
                }
            };

            if installed {
                let _ = INIT.set(opts.clone());
            }
        }

        TracingFactory { options: opts }
    }

    pub fn get_log_dir(&self) -> Option<String> {
        self.options.log_dir.clone()
    }

    pub fn is_debug(&self) -> bool {
        self.options.debug
    }
}

impl TracingFactoryOptions {
    pub fn new(debug: bool, output_type: OutputType, log_dir: Option<String>) -> Self {
        TracingFactoryOptions {
            debug,
            output_type,
            level: None,
            log_dir,
        }
    }

    pub fn new_with_debug(debug: bool) -> Self {
        TracingFactoryOptions {
            debug,
            output_type: OutputType::STDOUT,
            level: None,
            log_dir: None,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }
}

impl Default for TracingFactoryOptions {
    fn default() -> Self {
        TracingFactoryOptions::new_with_debug(false)
    }
}
