//! bdepot - Main entry point.
//!
//! Command-line front end for the Blender component repository.
//!
//! Usage: bdepot [--repository DIR] <COMMAND>
//!
//! Run `bdepot --help` for the command list.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use blender_depot::addon::Addon;
use blender_depot::component::{Component, ComponentKind, Entity};
use blender_depot::config::Config;
use blender_depot::context::DepotContext;
use blender_depot::dev_library::PythonDevLibrary;
use blender_depot::error::DepotError;
use blender_depot::logging;
use blender_depot::outcome::Outcome;
use blender_depot::python::PackageSet;
use blender_depot::repository::Repository;
use blender_depot::script::{Script, ScriptVariant};
use blender_depot::venv::BlenderVenv;

type CliResult = Result<(), DepotError>;

#[derive(Parser)]
#[command(author, version, about = "Blender component repository")]
struct Cli {
    /// Repository directory (overrides the configured one).
    #[arg(long, global = true)]
    repository: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show record counts per component kind.
    Status,
    /// List components, optionally of one kind.
    List {
        #[arg(value_enum)]
        kind: Option<KindArg>,
    },
    /// Add an addon (zip, .py file or package directory).
    AddAddon(AddAddonArgs),
    /// Add a Python script.
    AddScript(AddScriptArgs),
    /// Probe and add a Blender installation.
    AddProgram {
        /// Path to the Blender executable.
        exe: PathBuf,
        /// Always re-probe instead of reusing the object pool.
        #[arg(long)]
        no_pool: bool,
    },
    /// Add an existing venv, or create one from a program.
    AddVenv(AddVenvArgs),
    /// Add a Python dev library directory.
    AddDevLibrary {
        /// Library directory.
        path: PathBuf,
    },
    /// Create an empty setup.
    CreateSetup {
        /// Setup name.
        name: String,
        /// Also create a Blender config directory.
        #[arg(long)]
        with_config: bool,
    },
    /// Create an empty profile.
    CreateProfile {
        /// Profile name.
        name: String,
    },
    /// Deploy an addon or script into a setup, or a dev library into a venv.
    Deploy(DeployArgs),
    /// Bind a program, venv or setup to a profile.
    Bind {
        /// Profile name or uuid.
        profile: String,
        /// Component name or uuid.
        component: String,
    },
    /// Remove a component and its stored data.
    Remove {
        /// Component name or uuid.
        component: String,
    },
    /// Re-verify every component.
    Verify,
    /// Install packages, or the standalone bpy module, into a venv.
    PipInstall {
        /// Venv name or uuid.
        venv: String,
        /// `name==version` or bare `name` requirements.
        requirements: Vec<String>,
        /// Install the bpy module into the venv's bpy_package directory.
        #[arg(long)]
        bpy: bool,
        /// Reinstall bpy even if present.
        #[arg(long, requires = "bpy")]
        force: bool,
    },
    /// List the Python packages of a program or venv.
    Packages {
        /// Program or venv name or uuid.
        component: String,
        /// Look up summaries in the package index.
        #[arg(long)]
        enrich: bool,
    },
    /// Launch Blender for a profile.
    Launch {
        /// Profile name or uuid.
        profile: String,
    },
    /// Open a shell with a profile's venv activated.
    Shell {
        /// Profile name or uuid.
        profile: String,
    },
}

#[derive(Args)]
struct AddAddonArgs {
    /// Addon path.
    path: PathBuf,
    /// Register as a dev addon, referenced in place.
    #[arg(long)]
    dev: bool,
    /// Replace an older release of the same addon.
    #[arg(long)]
    upgrade: bool,
    /// Overwrite existing stored data.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct AddScriptArgs {
    /// Script path.
    path: PathBuf,
    /// Deploy into the startup directory.
    #[arg(long)]
    startup: bool,
    /// Register as a dev script, referenced in place.
    #[arg(long)]
    dev: bool,
    /// Replace the stored script with the same name.
    #[arg(long)]
    upgrade: bool,
    /// Overwrite existing stored data.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct AddVenvArgs {
    /// Existing venv directory.
    #[arg(long, conflicts_with_all = ["program", "name"])]
    path: Option<PathBuf>,
    /// Program name or uuid to create the venv from.
    #[arg(long, requires = "name")]
    program: Option<String>,
    /// Name of the venv to create.
    #[arg(long)]
    name: Option<String>,
    /// Replace an existing directory.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct DeployArgs {
    /// Setup or venv name or uuid.
    target: String,
    /// Addon, script or dev library name or uuid.
    component: String,
    /// Replace an existing deployment.
    #[arg(long)]
    force: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Program,
    Venv,
    Setup,
    Addon,
    DevAddon,
    Script,
    DevScript,
    DevLibrary,
    Profile,
}

impl From<KindArg> for ComponentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Program => ComponentKind::Program,
            KindArg::Venv => ComponentKind::Venv,
            KindArg::Setup => ComponentKind::Setup,
            KindArg::Addon => ComponentKind::ReleasedAddon,
            KindArg::DevAddon => ComponentKind::DevAddon,
            KindArg::Script => ComponentKind::ReleasedScript,
            KindArg::DevScript => ComponentKind::DevScript,
            KindArg::DevLibrary => ComponentKind::DevLibrary,
            KindArg::Profile => ComponentKind::Profile,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: could not load config, using defaults: {}", e);
            Config::default()
        }
    };
    if let Some(repository) = cli.repository {
        config.repository = repository;
    }

    if let Err(e) = logging::init(&config.log_config) {
        eprintln!("Warning: could not initialize logging: {}", e);
    }

    let ctx = DepotContext::new(config);
    let outcome = Outcome::from(run(&ctx, cli.command));
    if !outcome.ok {
        eprintln!("Error: {}", outcome.message());
        std::process::exit(1);
    }
}

fn run(ctx: &DepotContext, command: Commands) -> CliResult {
    let mut repo = ctx.open_repository()?;
    match command {
        Commands::Status => print!("{}", repo.summary()),
        Commands::List { kind } => list(&repo, kind),
        Commands::AddAddon(args) => add_addon(&mut repo, &args)?,
        Commands::AddScript(args) => add_script(&mut repo, &args)?,
        Commands::AddProgram { exe, no_pool } => {
            let program = ctx.probe_program(&exe, !no_pool, Some(repo.root()))?;
            let name = program.display_name();
            let uuid = repo.add_component(program.into(), false, false)?;
            repo.match_venvs_to_programs();
            println!("Added {} ({})", name, uuid);
        }
        Commands::AddVenv(args) => add_venv(ctx, &mut repo, &args)?,
        Commands::AddDevLibrary { path } => {
            let library = PythonDevLibrary::from_path(&path)?;
            let uuid = repo.add_component(library.into(), false, false)?;
            println!("Added dev library {}", uuid);
        }
        Commands::CreateSetup { name, with_config } => {
            let uuid = repo.create_setup(&name)?;
            if with_config {
                if let Some(mut setup) = repo.setups.get(uuid).cloned() {
                    setup.add_blender_config()?;
                    repo.setups.update(setup)?;
                }
            }
            println!("Created setup {} ({})", name, uuid);
        }
        Commands::CreateProfile { name } => {
            let uuid = repo.create_profile(&name)?;
            println!("Created profile {} ({})", name, uuid);
        }
        Commands::Deploy(args) => deploy(&mut repo, &args)?,
        Commands::Bind { profile, component } => {
            let mut profile = resolve_profile(&repo, &profile)?;
            let component = resolve(&repo, &component, &[
                ComponentKind::Program,
                ComponentKind::Venv,
                ComponentKind::Setup,
            ])?;
            let label = component.display_name();
            profile.add_component(component)?;
            let name = profile.display_name();
            repo.profiles.update(profile)?;
            println!("Bound {} to profile {}", label, name);
        }
        Commands::Remove { component } => {
            let component = resolve(&repo, &component, &ComponentKind::ALL)?;
            let removed = repo.remove_component(component.kind(), component.entity().core().uuid)?;
            println!("Removed {}", removed.display_name());
        }
        Commands::Verify => {
            let outcome = repo.verify_all();
            for message in &outcome.error_messages {
                println!("FAILED  {}", message);
            }
            println!(
                "{} verified, {} failed",
                outcome.success_messages.len(),
                outcome.error_count()
            );
            if !outcome.ok {
                return Err(DepotError::Consistency(format!(
                    "{} component(s) failed verification",
                    outcome.error_count()
                )));
            }
        }
        Commands::PipInstall {
            venv,
            requirements,
            bpy,
            force,
        } => pip_install(ctx, &mut repo, &venv, &requirements, bpy, force)?,
        Commands::Packages { component, enrich } => {
            let component = resolve(&repo, &component, &[ComponentKind::Program, ComponentKind::Venv])?;
            let mut packages = match component {
                Component::Program(p) => p.python_packages().clone(),
                Component::Venv(v) => v.python_packages().clone(),
                other => return Err(other.rejected_by("Packages").into()),
            };
            if enrich {
                ctx.enrich_packages(&mut packages);
            }
            for package in packages.iter() {
                let version = package.version_text.as_deref().unwrap_or("-");
                match &package.summary {
                    Some(summary) => println!("{:<32} {:<12} {}", package.name, version, summary),
                    None => println!("{:<32} {}", package.name, version),
                }
            }
        }
        Commands::Launch { profile } => {
            let profile = resolve_profile(&repo, &profile)?;
            let handle = profile.launch_blender(ctx.launcher.as_ref(), None)?;
            println!("Started Blender (pid {})", handle.pid);
        }
        Commands::Shell { profile } => {
            let profile = resolve_profile(&repo, &profile)?;
            profile.launch_venv(ctx.shell_launcher.as_ref(), None)?;
        }
    }
    Ok(())
}

fn list(repo: &Repository, kind: Option<KindArg>) {
    let kinds: Vec<ComponentKind> = match kind {
        Some(kind) => vec![kind.into()],
        None => ComponentKind::ALL.to_vec(),
    };
    for kind in kinds {
        let components = repo.list(kind);
        if components.is_empty() {
            continue;
        }
        println!("{}:", kind.label());
        for component in components {
            let core = component.entity().core();
            let verified = match kind {
                ComponentKind::Program => repo.programs.is_verified(core.uuid),
                ComponentKind::Venv => repo.venvs.is_verified(core.uuid),
                ComponentKind::Setup => repo.setups.is_verified(core.uuid),
                ComponentKind::ReleasedAddon => repo.addons.is_verified(core.uuid),
                ComponentKind::DevAddon => repo.dev_addons.is_verified(core.uuid),
                ComponentKind::ReleasedScript => repo.scripts.is_verified(core.uuid),
                ComponentKind::DevScript => repo.dev_scripts.is_verified(core.uuid),
                ComponentKind::DevLibrary => repo.dev_libraries.is_verified(core.uuid),
                ComponentKind::Profile => repo.profiles.is_verified(core.uuid),
            };
            let flag = if verified { "" } else { "  [unverified]" };
            println!("  {}  {}{}", core.uuid, component.display_name(), flag);
        }
    }
}

fn add_addon(repo: &mut Repository, args: &AddAddonArgs) -> CliResult {
    let addon = if args.dev {
        Addon::dev_from_path(&args.path)?
    } else {
        Addon::from_path(&args.path, Some(repo.root()))?
    };
    let name = addon.repo_display_name();
    let uuid = if args.upgrade {
        repo.upgrade_component(addon.into(), args.force)?
    } else {
        repo.add_component(addon.into(), true, args.force)?
    };
    println!("Added addon {} ({})", name, uuid);
    Ok(())
}

fn add_script(repo: &mut Repository, args: &AddScriptArgs) -> CliResult {
    let variant = ScriptVariant::new(args.startup, args.dev);
    let script = Script::new(&args.path, variant, Some(repo.root()))?;
    let name = script.display_name();
    let uuid = if args.upgrade {
        repo.upgrade_component(script.into(), args.force)?
    } else {
        repo.add_component(script.into(), true, args.force)?
    };
    println!("Added {} script {} ({})", variant, name, uuid);
    Ok(())
}

fn add_venv(ctx: &DepotContext, repo: &mut Repository, args: &AddVenvArgs) -> CliResult {
    let uuid = match (&args.path, &args.program, &args.name) {
        (Some(path), _, _) => {
            let venv = BlenderVenv::from_path(path, Some(repo.root()))?;
            let uuid = repo.add_component(venv.into(), false, false)?;
            repo.match_venvs_to_programs();
            uuid
        }
        (None, Some(program), Some(name)) => {
            let program = resolve(repo, program, &[ComponentKind::Program])?;
            let uuid = program.entity().core().uuid;
            repo.create_venv(uuid, name, ctx.runner.as_ref(), args.force)?
        }
        _ => {
            return Err(DepotError::Validation("pass --path, or --program with --name".to_string()).into());
        }
    };
    println!("Added venv {}", uuid);
    Ok(())
}

fn pip_install(
    ctx: &DepotContext,
    repo: &mut Repository,
    query: &str,
    requirements: &[String],
    bpy: bool,
    force: bool,
) -> CliResult {
    let mut venv = match resolve(repo, query, &[ComponentKind::Venv])? {
        Component::Venv(venv) => venv,
        other => return Err(other.rejected_by("PipInstall").into()),
    };
    if bpy {
        if venv.install_bpy_package(ctx.runner.as_ref(), force)? {
            println!("Installed bpy into {}", venv.bpy_package_dir().display());
        } else {
            println!("bpy is already installed in {}", venv.display_name());
        }
    }
    let packages = PackageSet::from_freeze_text(&requirements.join("\n"));
    if !packages.is_empty() {
        venv.install_site_packages(ctx.runner.as_ref(), &packages)?;
        println!("Installed {}", packages.install_string());
    }
    repo.venvs.update(venv)?;
    Ok(())
}

fn deploy(repo: &mut Repository, args: &DeployArgs) -> CliResult {
    let component = resolve(repo, &args.component, &[
        ComponentKind::ReleasedAddon,
        ComponentKind::DevAddon,
        ComponentKind::ReleasedScript,
        ComponentKind::DevScript,
        ComponentKind::DevLibrary,
    ])?;

    if let Component::DevLibrary(library) = &component {
        let venv = match resolve(repo, &args.target, &[ComponentKind::Venv])? {
            Component::Venv(venv) => venv,
            other => return Err(other.rejected_by("Deploy").into()),
        };
        let path = venv.install_dev_library(library, args.force)?;
        println!("Linked {} into {}", library.display_name(), path.display());
        return Ok(());
    }

    let mut setup = match resolve(repo, &args.target, &[ComponentKind::Setup])? {
        Component::Setup(setup) => setup,
        other => return Err(other.rejected_by("Deploy").into()),
    };
    let path = setup.add_component(&component, args.force)?;
    repo.setups.update(setup)?;
    println!("Deployed {} to {}", component.display_name(), path.display());
    Ok(())
}

fn resolve_profile(repo: &Repository, query: &str) -> Result<blender_depot::Profile, DepotError> {
    match resolve(repo, query, &[ComponentKind::Profile])? {
        Component::Profile(profile) => Ok(profile),
        other => Err(other.rejected_by("Profile")),
    }
}

/// Finds exactly one component of the given kinds by name or uuid.
fn resolve(repo: &Repository, query: &str, kinds: &[ComponentKind]) -> Result<Component, DepotError> {
    let mut matches: Vec<Component> = repo
        .find(query)
        .into_iter()
        .filter(|c| kinds.contains(&c.kind()))
        .collect();
    match matches.len() {
        0 => Err(DepotError::NotFound(query.to_string(), "repository".to_string())),
        1 => Ok(matches.remove(0)),
        n => Err(DepotError::Validation(format!(
            "{} matches {} components; use a uuid",
            query, n
        ))),
    }
}
