mod entity;
pub mod flow;
mod hub;
mod sensor;
mod switch;
mod vacuum;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use linkme::distributed_slice;
use tokio::task::JoinHandle;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub use entity::EntityType;
pub use entity::LitterRobotEntity;
pub use entity::Model;
pub use flow::ConfigEntry;
pub use flow::ConfigFlow;
pub use flow::FlowResult;
pub use hub::Hub;
pub use hub::HubError;
pub use sensor::waste_drawer_icon;
pub use vacuum::CleanerState;

use crate::account::AccountFactory;
use crate::config::CloudConfig;
use crate::engine;
use crate::engine::CommandError;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::Platform;
use crate::engine::SetupError;
use crate::engine::ToIntegrationMessage;

pub const DOMAIN: &str = "litterrobot";

type PlatformSetup = fn(&Arc<Hub>) -> Vec<Arc<dyn Entity>>;

/// Platforms set up for every account, in order
const PLATFORMS: &[(Platform, PlatformSetup)] = &[
    (Platform::Sensor, sensor::setup_entities),
    (Platform::Switch, switch::setup_entities),
    (Platform::Vacuum, vacuum::setup_entities),
];

/// Entities of one account, keyed by entity id
type EntityMap = BTreeMap<String, Arc<dyn Entity>>;

/// Litter-Robot integration for one configured account
///
/// Setup logs in, registers one entity per robot per entity type and starts
/// polling. Every hub update re-renders all entities of the account.
pub struct LitterRobotIntegration {
    entry: ConfigEntry,
    timezone: Tz,
    factory: AccountFactory,
    hub: Option<Arc<Hub>>,
    entities: EntityMap,
    to_engine: Option<FromIntegrationSender>,
    listener: Option<JoinHandle<()>>,
    commands: JoinSet<()>,
}

impl LitterRobotIntegration {
    pub fn new(entry: ConfigEntry, timezone: Tz, factory: AccountFactory) -> Self {
        Self {
            entry,
            timezone,
            factory,
            hub: None,
            entities: BTreeMap::new(),
            to_engine: None,
            listener: None,
            commands: JoinSet::new(),
        }
    }

    pub fn hub(&self) -> Option<&Arc<Hub>> {
        self.hub.as_ref()
    }

    async fn send(
        tx: &FromIntegrationSender,
        msg: FromIntegrationMessage,
    ) -> Result<(), SetupError> {
        tx.send(msg)
            .await
            .map_err(|_| SetupError::Failed("engine stopped".to_string()))
    }

    /// Entity id for `entity`, suffixed with `_2`, `_3`, ... when robots share a name.
    fn unused_entity_id(&self, entity: &dyn Entity) -> String {
        let base = entity.entity_id();
        let mut entity_id = base.clone();
        let mut n = 2;
        while self.entities.contains_key(&entity_id) {
            entity_id = format!("{}_{}", base, n);
            n += 1;
        }
        entity_id
    }

    /// Report the state of every entity whenever the hub has new data.
    fn spawn_state_listener(&mut self, hub: &Hub, tx: FromIntegrationSender) {
        let mut updates = hub.subscribe();
        let entities: Vec<(String, Arc<dyn Entity>)> = self
            .entities
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        let entry_id = self.entry.entry_id.clone();

        self.listener = Some(tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                debug!("[{}] Robot data updated", entry_id);
                for (entity_id, entity) in &entities {
                    let msg = FromIntegrationMessage::StateChanged {
                        entity_id: entity_id.clone(),
                        state: entity.state(),
                    };
                    if tx.send(msg).await.is_err() {
                        return;
                    }
                }
            }
        }));
    }
}

#[async_trait]
impl Integration for LitterRobotIntegration {
    fn name(&self) -> &str {
        &self.entry.entry_id
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), SetupError> {
        let entry_id = self.entry.entry_id.clone();
        info!("[{}] Setting up Litter-Robot account {}", entry_id, self.entry.title);

        let account = (self.factory)().map_err(|e| SetupError::Failed(e.to_string()))?;
        let hub = Arc::new(Hub::new(
            entry_id.clone(),
            self.entry.data.clone(),
            self.timezone,
            account,
        ));

        hub.login(true).await.map_err(|e| match e {
            HubError::InvalidAuth(_) => SetupError::Failed(e.to_string()),
            HubError::NotReady(source) => SetupError::NotReady(source.to_string()),
        })?;

        for (platform, setup_entities) in PLATFORMS {
            let entities = setup_entities(&hub);
            debug!("[{}] {} {} entities", entry_id, entities.len(), platform);

            for entity in entities {
                let entity_id = self.unused_entity_id(entity.as_ref());
                Self::send(
                    &tx,
                    FromIntegrationMessage::EntityDiscovered {
                        entity_id: entity_id.clone(),
                        entity: entity.clone(),
                        integration_name: entry_id.clone(),
                    },
                )
                .await?;
                Self::send(
                    &tx,
                    FromIntegrationMessage::StateChanged {
                        entity_id: entity_id.clone(),
                        state: entity.state(),
                    },
                )
                .await?;
                self.entities.insert(entity_id, entity);
            }
        }

        self.spawn_state_listener(&hub, tx.clone());
        hub.spawn_polling();

        info!(
            "[{}] Litter-Robot ready with {} robots, {} entities",
            entry_id,
            hub.robots().len(),
            self.entities.len()
        );
        self.hub = Some(hub);
        self.to_engine = Some(tx);
        Ok(())
    }

    async fn handle_message(&mut self, msg: ToIntegrationMessage) -> anyhow::Result<()> {
        // Reap finished commands
        while self.commands.try_join_next().is_some() {}

        match msg {
            ToIntegrationMessage::EntityCommand {
                entity_id,
                command,
                reply,
            } => {
                let Some(entity) = self.entities.get(&entity_id).cloned() else {
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(CommandError::UnknownEntity(entity_id.clone())));
                    }
                    anyhow::bail!("command for unknown entity {}", entity_id);
                };

                // Commands wait for the robot to settle, so each runs on its own task
                let entry_id = self.entry.entry_id.clone();
                self.commands.spawn(async move {
                    let result = entity.handle_command(command).await;
                    if let Err(e) = &result {
                        warn!("[{}] Command for {} failed: {}", entry_id, entity_id, e);
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                });
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        let entry_id = self.entry.entry_id.clone();
        info!("[{}] Unloading Litter-Robot account", entry_id);

        while let Some(res) = self.commands.join_next().await {
            if let Err(e) = res {
                warn!("[{}] Command task ended abnormally: {}", entry_id, e);
            }
        }

        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(hub) = self.hub.take() {
            hub.shutdown();
        }

        let entities = std::mem::take(&mut self.entities);
        if let Some(tx) = self.to_engine.take() {
            for entity_id in entities.into_keys() {
                tx.send(FromIntegrationMessage::EntityRemoved { entity_id })
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "cloud")]
pub fn account_factory(cloud: &CloudConfig) -> anyhow::Result<AccountFactory> {
    use crate::account::cloud::CloudAccount;
    use crate::account::Account;
    use crate::account::AccountError;

    let cloud = cloud.clone();
    Ok(Arc::new(
        move || -> Result<Arc<dyn Account>, AccountError> {
            Ok(Arc::new(CloudAccount::new(&cloud)?))
        },
    ))
}

#[cfg(not(feature = "cloud"))]
pub fn account_factory(_cloud: &CloudConfig) -> anyhow::Result<AccountFactory> {
    anyhow::bail!("litterrobotd was built without the cloud feature")
}

/// Build one integration per accepted account.
pub fn integrations_from_entries(
    flow: &mut ConfigFlow,
    accounts: &[crate::config::AccountConfig],
    timezone: Tz,
    factory: &AccountFactory,
) -> Vec<Box<dyn Integration>> {
    let mut integrations: Vec<Box<dyn Integration>> = Vec::new();
    for account in accounts {
        match flow.step_import(account.clone()) {
            FlowResult::CreateEntry(entry) => {
                integrations.push(Box::new(LitterRobotIntegration::new(
                    entry,
                    timezone,
                    factory.clone(),
                )));
            }
            FlowResult::Abort { reason } => {
                warn!("Skipping Litter-Robot account {}: {}", account.username, reason);
            }
            FlowResult::ShowForm { errors } => {
                warn!(
                    "Skipping Litter-Robot account {}: {:?}",
                    account.username, errors
                );
            }
        }
    }
    integrations
}

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_litterrobot(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let Some(cfg) = &ctx.config.integrations.litterrobot else {
        return Ok(Vec::new());
    };

    let timezone = ctx.config.location.tz()?;
    let factory = account_factory(&cfg.cloud)?;
    let mut flow = ConfigFlow::new(factory.clone());
    Ok(integrations_from_entries(
        &mut flow,
        &cfg.accounts,
        timezone,
        &factory,
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::sync::oneshot;

    use super::*;
    use crate::account::fake::FakeAccount;
    use crate::account::fake::FakeRobot;
    use crate::account::fake::RobotCall;
    use crate::account::Account;
    use crate::config::AccountConfig;
    use crate::engine::EntityCommand;

    fn integration(account: Arc<FakeAccount>) -> LitterRobotIntegration {
        let factory: AccountFactory = Arc::new(move || Ok(account.clone() as Arc<dyn Account>));
        let mut flow = ConfigFlow::new(factory.clone());
        let FlowResult::CreateEntry(entry) =
            flow.step_import(AccountConfig::new("cat@example.com", "secret"))
        else {
            panic!("import rejected");
        };
        LitterRobotIntegration::new(entry, Tz::UTC, factory)
    }

    fn drain(rx: &mut mpsc::Receiver<FromIntegrationMessage>) -> Vec<FromIntegrationMessage> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    #[tokio::test]
    async fn test_setup_registers_all_entities() {
        let robots = vec![
            Arc::new(FakeRobot::with_serial("LR3C1", "Kitty")),
            Arc::new(FakeRobot::with_serial("LR3C2", "Tom")),
        ];
        let mut integration = integration(Arc::new(FakeAccount::new(robots)));
        let (tx, mut rx) = mpsc::channel(64);

        integration.setup(tx).await.unwrap();

        let discovered: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                FromIntegrationMessage::EntityDiscovered { entity, .. } => Some(entity.unique_id()),
                _ => None,
            })
            .collect();
        // 2 sensors, 3 switches, 1 cleaner per robot
        assert_eq!(discovered.len(), 12);
        assert!(discovered.contains(&"LR3C2-Litter Box".to_string()));
        assert_eq!(integration.name(), "litterrobot_cat_example_com");

        integration.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_robots_sharing_a_name_keep_separate_entities() {
        let first = Arc::new(FakeRobot::with_serial("LR3C1", "Litter-Robot"));
        let second = Arc::new(FakeRobot::with_serial("LR3C2", "Litter-Robot"));
        let account = Arc::new(FakeAccount::new(vec![first.clone(), second.clone()]));
        let mut integration = integration(account);
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();

        let discovered: BTreeMap<String, String> = drain(&mut rx)
            .into_iter()
            .filter_map(|m| match m {
                FromIntegrationMessage::EntityDiscovered {
                    entity_id, entity, ..
                } => Some((entity_id, entity.unique_id())),
                _ => None,
            })
            .collect();
        assert_eq!(discovered.len(), 12);
        assert_eq!(
            discovered["switch.litter_robot_night_light"],
            "LR3C1-Night Light"
        );
        assert_eq!(
            discovered["switch.litter_robot_night_light_2"],
            "LR3C2-Night Light"
        );

        let (reply_tx, reply_rx) = oneshot::channel();
        integration
            .handle_message(ToIntegrationMessage::EntityCommand {
                entity_id: "switch.litter_robot_night_light".to_string(),
                command: EntityCommand::TurnOn {
                    params: Default::default(),
                },
                reply: Some(reply_tx),
            })
            .await
            .unwrap();
        reply_rx.await.unwrap().unwrap();

        assert_eq!(first.calls(), vec![RobotCall::SetNightLight(true)]);
        assert!(second.calls().is_empty());

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_invalid_credentials_fails() {
        let account = Arc::new(FakeAccount::new(vec![]).with_password("other"));
        let mut integration = integration(account);
        let (tx, _rx) = mpsc::channel(64);

        let err = integration.setup(tx).await.unwrap_err();
        assert!(matches!(err, SetupError::Failed(_)));
    }

    #[tokio::test]
    async fn test_setup_unreachable_not_ready() {
        let account = Arc::new(FakeAccount::new(vec![]));
        account.set_unreachable(true);
        let mut integration = integration(account);
        let (tx, _rx) = mpsc::channel(64);

        let err = integration.setup(tx).await.unwrap_err();
        assert!(matches!(err, SetupError::NotReady(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_runs_and_replies() {
        let robot = Arc::new(FakeRobot::with_serial("LR3C1", "Kitty"));
        let mut integration = integration(Arc::new(FakeAccount::new(vec![robot.clone()])));
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();
        drain(&mut rx);

        let (reply_tx, reply_rx) = oneshot::channel();
        integration
            .handle_message(ToIntegrationMessage::EntityCommand {
                entity_id: "switch.kitty_night_light".to_string(),
                command: EntityCommand::TurnOn {
                    params: Default::default(),
                },
                reply: Some(reply_tx),
            })
            .await
            .unwrap();

        reply_rx.await.unwrap().unwrap();
        assert_eq!(robot.calls(), vec![RobotCall::SetNightLight(true)]);

        // The forced refresh re-renders every entity of the account
        tokio::time::sleep(Duration::from_millis(10)).await;
        let night_light = drain(&mut rx).into_iter().find_map(|m| match m {
            FromIntegrationMessage::StateChanged { entity_id, state }
                if entity_id == "switch.kitty_night_light" =>
            {
                Some(state)
            }
            _ => None,
        });
        assert_eq!(night_light.map(|s| s.state).as_deref(), Some("on"));

        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_command_for_unknown_entity() {
        let mut integration = integration(Arc::new(FakeAccount::new(vec![])));
        let (tx, _rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        let result = integration
            .handle_message(ToIntegrationMessage::EntityCommand {
                entity_id: "switch.nothing".to_string(),
                command: EntityCommand::TurnOff,
                reply: Some(reply_tx),
            })
            .await;

        assert!(result.is_err());
        assert!(matches!(
            reply_rx.await.unwrap(),
            Err(CommandError::UnknownEntity(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_removes_entities() {
        let robot = Arc::new(FakeRobot::with_serial("LR3C1", "Kitty"));
        let mut integration = integration(Arc::new(FakeAccount::new(vec![robot])));
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();
        drain(&mut rx);
        let hub = integration.hub().cloned().unwrap();

        integration.shutdown().await.unwrap();

        let removed = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, FromIntegrationMessage::EntityRemoved { .. }))
            .count();
        assert_eq!(removed, 6);
        assert!(!hub.logged_in());
    }

    #[test]
    fn test_only_first_account_is_imported() {
        let factory: AccountFactory =
            Arc::new(|| Ok(Arc::new(FakeAccount::new(vec![])) as Arc<dyn Account>));
        let mut flow = ConfigFlow::new(factory.clone());
        let accounts = vec![
            AccountConfig::new("a@example.com", "x"),
            AccountConfig::new("b@example.com", "y"),
        ];

        let integrations = integrations_from_entries(&mut flow, &accounts, Tz::UTC, &factory);
        assert_eq!(integrations.len(), 1);
        assert_eq!(integrations[0].name(), "litterrobot_a_example_com");
    }
}
