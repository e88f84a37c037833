//! Plan assembly - プロジェクト一覧からタスク一覧を作る（起動時に 1 度だけ）
//!
//! # 規則
//! - mobile
//!   - シミュレータ: 構成 × プラットフォームごとにビルド 1 つ。iOS_Unified は 32/64 の 2 実行がビルドを共有
//!   - 実行はプラットフォームファミリーごとのバッチ（"Tests for iOS" など）にまとめる
//!   - デバイス: 実行ごとにビルド 1 つ（実行後に clean するため共有しない）
//! - desktop: ビルド + ホスト実行
//! - make: make ターゲット 1 つ。作業ディレクトリの確認とログ回収のフックを付ける
//! - variations があれば、構成ごとのタスクの代わりに variation ごとのタスクを作る
//! - prerequisite はプロジェクトの全タスクで共有する（1 回だけ走る）
//! - include フラグやプロジェクトの ignored に外れたタスクは Ignored で作る

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::batch::{BatchMember, SimulatorBatch};
use crate::config::IncludeFlags;
use crate::domain::ids::Task;
use crate::domain::{
    IdAllocator, MakeSpec, PlatformFamily, ProjectKind, ProjectSpec, TargetKind, TestPlatform,
};
use crate::error::HarnessError;
use crate::harness::Harness;
use crate::pipeline::{
    BuildProject, CollectLogs, DesktopTarget, DeviceTarget, Prerequisite, RequireDirectory, RunSettings, RunTest,
    SimulatorTarget,
};
use crate::ports::{BuildRequest, BuildTool};
use crate::task::{Executable, TaskHook, TaskHooks, TaskInfo, TestTask};

/// Turns the plan's projects into top-level tasks (batches last).
pub fn assemble(harness: &Arc<Harness>, projects: &[ProjectSpec]) -> Result<Vec<Arc<TestTask>>, HarnessError> {
    let mut assembler = Assembler {
        harness,
        ids: IdAllocator::new(),
        top: Vec::new(),
        batches: Vec::new(),
    };
    for project in projects {
        assembler.project(project)?;
    }
    let tasks = assembler.finish();
    info!(tasks = tasks.len(), "plan assembled");
    Ok(tasks)
}

/// One (variation, configuration) combination of a project.
struct Variant {
    name: Option<String>,
    configuration: String,
    ignored: bool,
}

struct Batch {
    family: PlatformFamily,
    platform: TestPlatform,
    members: Vec<BatchMember>,
}

struct Assembler<'a> {
    harness: &'a Arc<Harness>,
    ids: IdAllocator<Task>,
    top: Vec<Arc<TestTask>>,
    batches: Vec<Batch>,
}

impl Assembler<'_> {
    fn include(&self) -> &IncludeFlags {
        &self.harness.config.include
    }

    fn platform_included(&self, platform: TestPlatform) -> bool {
        let include = self.include();
        match platform.family() {
            PlatformFamily::Ios => include.ios,
            PlatformFamily::TvOs => include.tvos,
            PlatformFamily::WatchOs => include.watchos,
            PlatformFamily::Mac => include.mac,
            PlatformFamily::Other => true,
        }
    }

    fn kind_included(&self, kind: TargetKind) -> bool {
        match kind {
            TargetKind::Simulator => self.include().simulator,
            TargetKind::Device => self.include().device,
        }
    }

    fn variants(project: &ProjectSpec) -> Vec<Variant> {
        if project.variations.is_empty() {
            return project
                .configurations
                .iter()
                .map(|c| Variant {
                    name: None,
                    configuration: c.clone(),
                    ignored: false,
                })
                .collect();
        }
        let base = project
            .configurations
            .first()
            .cloned()
            .unwrap_or_else(|| "Debug".to_string());
        project
            .variations
            .iter()
            .map(|v| Variant {
                name: Some(v.name.clone()),
                configuration: v.configuration.clone().unwrap_or_else(|| base.clone()),
                ignored: v.ignored,
            })
            .collect()
    }

    fn info(project: &ProjectSpec, mode: String, variant: &Variant, platform: TestPlatform) -> TaskInfo {
        let info = TaskInfo::new(&project.name, mode, platform).with_project_path(&project.path);
        match &variant.name {
            Some(name) => info.with_variation(name),
            None => info,
        }
    }

    fn task(&self, info: TaskInfo, body: Arc<dyn Executable>, hooks: &TaskHooks) -> Arc<TestTask> {
        Arc::new(TestTask::new(self.ids.next(), info, Arc::clone(self.harness), body).with_hooks(hooks.clone()))
    }

    fn build_request(
        &self,
        project: &ProjectSpec,
        platform: TestPlatform,
        project_platform: &str,
        configuration: &str,
    ) -> BuildRequest {
        BuildRequest {
            test_name: project.name.clone(),
            project_path: project.path.clone(),
            platform,
            project_platform: project_platform.to_string(),
            configuration: configuration.to_string(),
            environment: project.environment.clone(),
            solution: project.solution.clone(),
            tool: BuildTool::Project,
            timeout: self.harness.config.build_timeout(),
        }
    }

    fn make_request(&self, project: &ProjectSpec, make: &MakeSpec) -> BuildRequest {
        BuildRequest {
            test_name: project.name.clone(),
            project_path: project.path.clone(),
            platform: TestPlatform::Mac,
            project_platform: String::new(),
            configuration: String::new(),
            environment: project.environment.clone(),
            solution: None,
            tool: BuildTool::Make {
                target: make.target.clone(),
                working_directory: PathBuf::from(&make.working_directory),
            },
            timeout: make
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| self.harness.config.make_timeout()),
        }
    }

    fn build(&self, project: &ProjectSpec, info: TaskInfo, request: BuildRequest, hooks: &TaskHooks) -> Arc<TestTask> {
        let platform = request.platform;
        let parallel = project
            .supports_parallel_build
            .unwrap_or_else(|| platform.supports_parallel_build());
        self.task(info, Arc::new(BuildProject::new(request).parallel(parallel)), hooks)
    }

    fn settings(project: &ProjectSpec, variant: &Variant) -> RunSettings {
        RunSettings {
            executable: project.executable.clone().or_else(|| Some(project.path.clone())),
            environment: project.environment.clone(),
            build_only: project.build_only,
            ..RunSettings::new(project.bundle_id(), variant.configuration.clone())
        }
    }

    fn project(&mut self, project: &ProjectSpec) -> Result<(), HarnessError> {
        let mut hooks = TaskHooks::new();
        if let Some(prerequisite) = &project.prerequisite {
            let hook: Arc<dyn TaskHook> = Arc::new(Prerequisite::new(self.make_request(project, prerequisite)));
            hooks = hooks.dependency(hook);
        }

        match project.kind {
            ProjectKind::Make => self.make_project(project, hooks),
            ProjectKind::Desktop => {
                for variant in Self::variants(project) {
                    for platform in project.platforms() {
                        self.desktop_run(project, &variant, platform, &hooks);
                    }
                }
                Ok(())
            }
            ProjectKind::Mobile => {
                for variant in Self::variants(project) {
                    for platform in project.platforms() {
                        if !matches!(
                            platform.family(),
                            PlatformFamily::Ios | PlatformFamily::TvOs | PlatformFamily::WatchOs
                        ) {
                            warn!(project = %project.name, %platform, "not a mobile platform, skipping");
                            continue;
                        }
                        if project.run_on.contains(&TargetKind::Simulator) {
                            self.simulator_runs(project, &variant, platform, &hooks);
                        }
                        if project.run_on.contains(&TargetKind::Device) {
                            self.device_runs(project, &variant, platform, &hooks);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn make_project(&mut self, project: &ProjectSpec, hooks: TaskHooks) -> Result<(), HarnessError> {
        let make = project
            .make
            .as_ref()
            .ok_or_else(|| HarnessError::Config(format!("make project '{}' needs a 'make' section", project.name)))?;
        let mut hooks = hooks.setup(Arc::new(RequireDirectory(PathBuf::from(&make.working_directory))));
        if !make.log_files.is_empty() {
            hooks = hooks.completion(Arc::new(CollectLogs {
                directory: PathBuf::from(&make.working_directory),
                files: make.log_files.clone(),
            }));
        }

        let request = self.make_request(project, make);
        let info = TaskInfo::new(&project.name, "", TestPlatform::Mac).with_project_path(&project.path);
        let body = Arc::new(BuildProject::new(request).parallel(make.supports_parallel));
        let ignored = project.ignored || !self.include().make;
        let task = Arc::new(
            TestTask::new(self.ids.next(), info, Arc::clone(self.harness), body)
                .with_hooks(hooks)
                .ignored(ignored),
        );
        debug!(task_id = %task.id(), project = %project.name, "make task");
        self.top.push(task);
        Ok(())
    }

    fn desktop_run(&mut self, project: &ProjectSpec, variant: &Variant, platform: TestPlatform, hooks: &TaskHooks) {
        let request = self.build_request(project, platform, "AnyCPU", &variant.configuration);
        let build = self.build(project, Self::info(project, platform.to_string(), variant, platform), request, hooks);
        let ignored = project.ignored || variant.ignored || !self.platform_included(platform);
        let body = Arc::new(RunTest::new(build, Self::settings(project, variant), DesktopTarget));
        let run = Arc::new(
            TestTask::new(
                self.ids.next(),
                Self::info(project, platform.to_string(), variant, platform),
                Arc::clone(self.harness),
                body,
            )
            .with_hooks(hooks.clone())
            .ignored(ignored),
        );
        self.top.push(run);
    }

    /// iOS_Unified builds once and runs as 32- and 64-bit.
    fn run_platforms(platform: TestPlatform) -> Vec<TestPlatform> {
        match platform {
            TestPlatform::IosUnified => vec![TestPlatform::IosUnified32, TestPlatform::IosUnified64],
            other => vec![other],
        }
    }

    fn simulator_runs(&mut self, project: &ProjectSpec, variant: &Variant, platform: TestPlatform, hooks: &TaskHooks) {
        let request = self.build_request(project, platform, "iPhoneSimulator", &variant.configuration);
        let build = self.build(project, Self::info(project, platform.mode_label(), variant, platform), request, hooks);

        for run_platform in Self::run_platforms(platform) {
            let ignored = project.ignored
                || variant.ignored
                || !self.kind_included(TargetKind::Simulator)
                || !self.platform_included(run_platform);
            let body = Arc::new(RunTest::new(
                Arc::clone(&build),
                Self::settings(project, variant),
                SimulatorTarget::new(run_platform),
            ));
            let task = Arc::new(
                TestTask::new(
                    self.ids.next(),
                    Self::info(project, run_platform.mode_label(), variant, run_platform),
                    Arc::clone(self.harness),
                    body.clone(),
                )
                .with_hooks(hooks.clone())
                .ignored(ignored),
            );
            self.batch_for(run_platform).members.push(BatchMember { task, run: body });
        }
    }

    fn device_runs(&mut self, project: &ProjectSpec, variant: &Variant, platform: TestPlatform, hooks: &TaskHooks) {
        for run_platform in Self::run_platforms(platform) {
            let request = self.build_request(project, run_platform, "iPhone", &variant.configuration);
            let build = self.build(
                project,
                Self::info(project, run_platform.mode_label(), variant, run_platform),
                request.clone(),
                hooks,
            );
            let ignored = project.ignored
                || variant.ignored
                || !self.kind_included(TargetKind::Device)
                || !self.platform_included(run_platform);
            let body = Arc::new(RunTest::new(
                build,
                Self::settings(project, variant),
                DeviceTarget::new(run_platform).with_clean(request),
            ));
            let task = Arc::new(
                TestTask::new(
                    self.ids.next(),
                    Self::info(project, run_platform.mode_label(), variant, run_platform),
                    Arc::clone(self.harness),
                    body,
                )
                .with_hooks(hooks.clone())
                .ignored(ignored),
            );
            self.top.push(task);
        }
    }

    fn batch_for(&mut self, platform: TestPlatform) -> &mut Batch {
        let family = platform.family();
        let index = match self.batches.iter().position(|b| b.family == family) {
            Some(index) => index,
            None => {
                let representative = match family {
                    PlatformFamily::TvOs => TestPlatform::TvOs,
                    PlatformFamily::WatchOs => TestPlatform::WatchOs,
                    _ => TestPlatform::Ios,
                };
                self.batches.push(Batch {
                    family,
                    platform: representative,
                    members: Vec::new(),
                });
                self.batches.len() - 1
            }
        };
        &mut self.batches[index]
    }

    fn finish(mut self) -> Vec<Arc<TestTask>> {
        for batch in std::mem::take(&mut self.batches) {
            let ignored = batch.members.iter().all(|m| m.task.is_ignored());
            let info = TaskInfo::new(format!("Tests for {}", batch.platform), "", batch.platform);
            let task = Arc::new(
                TestTask::new(
                    self.ids.next(),
                    info,
                    Arc::clone(self.harness),
                    Arc::new(SimulatorBatch::new(batch.members)),
                )
                .ignored(ignored),
            );
            self.top.push(task);
        }
        self.top
    }
}
