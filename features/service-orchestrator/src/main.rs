use std::{convert::Infallible, error::Error, sync::Arc, time::Duration};

use service_orchestrator::{timer, Orchestrator, ServiceDescriptor};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let orchestrator = Orchestrator::new();
    if let Err(e) = register(&orchestrator) {
        eprintln!("Failed to register services: {e}");
        std::process::exit(1);
    }

    let services = match futures::executor::block_on(orchestrator.initialize_all()) {
        Ok(services) => services,
        Err(e) => {
            eprintln!("Startup failed: {e}");
            std::process::exit(1);
        }
    };

    match services.require::<Editor>("editor") {
        Ok(editor) => println!(
            "Editor ready with {} documents, autosaving every {:?}",
            editor.storage.documents, editor.autosave
        ),
        Err(e) => eprintln!("{e}"),
    }
    println!("{}", orchestrator.debug_info());
    println!("{:?}", futures::executor::block_on(orchestrator.check_health()));
}

#[derive(Debug)]
struct Settings {
    autosave: Duration,
}

#[derive(Debug)]
struct Storage {
    documents: usize,
}

#[derive(Debug)]
struct Editor {
    storage: Arc<Storage>,
    autosave: Duration,
}

fn register(orchestrator: &Orchestrator) -> Result<(), Box<dyn Error>> {
    orchestrator.register(ServiceDescriptor::new("settings").instance(Settings {
        autosave: Duration::from_secs(30),
    }))?;

    orchestrator.register(
        ServiceDescriptor::new("storage")
            .depends_on(["settings"])
            .timeout(Duration::from_secs(2))
            .factory(|| async {
                // Simulate opening the document store
                timer::delay(Duration::from_millis(100)).await;
                Ok::<_, Infallible>(Storage { documents: 12 })
            })
            .health_check(|storage: Arc<Storage>| async move {
                Ok::<_, Infallible>(storage.documents > 0)
            }),
    )?;

    // Spell checking is nice to have - the editor starts without it
    orchestrator.register(
        ServiceDescriptor::new("spellcheck")
            .optional()
            .timeout(Duration::from_millis(200))
            .factory(|| futures::future::pending::<Result<(), Infallible>>()),
    )?;

    let locator = orchestrator.locator();
    orchestrator.register(
        ServiceDescriptor::new("editor")
            .depends_on(["settings", "storage", "spellcheck"])
            .factory(move || {
                let locator = locator.clone();
                async move {
                    let settings = locator.require::<Settings>("settings")?;
                    let storage = locator.require::<Storage>("storage")?;
                    Ok::<_, Box<dyn Error + Send + Sync>>(Editor {
                        storage,
                        autosave: settings.autosave,
                    })
                }
            }),
    )?;

    Ok(())
}
