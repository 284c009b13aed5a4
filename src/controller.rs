//! Daemon controller
//!
//! Single owner of the settings, the write side of the remap config, both
//! filter lifecycles and the input source rotator. Requests from the IPC
//! server and notices from the tap threads are handled one at a time.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::events::{DaemonEvent, FilterKind};
use crate::hotkey::ComboModifier;
use crate::input_source::{InputSourceError, InputSourceProvider, InputSourceRotator};
use crate::ipc::{DaemonStatus, EditClassStatus, Request, Response};
use crate::platform::PERMISSION_REMEDIATION;
use crate::remap::{EditCommandClass, KeyCodeTransition, RemapConfig, RemapConfigStore};
use crate::tap::{ChordBackend, FilterBackend, TapError, TapLifecycle, TapNotice};

/// Re-arms tolerated per filter within `UNSTABLE_WINDOW`
const UNSTABLE_REARMS: usize = 5;
const UNSTABLE_WINDOW: Duration = Duration::from_secs(30);

/// Messages into the controller queue
#[derive(Debug)]
pub enum ControlMessage {
    Request {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
}

/// Platform pieces the controller drives
pub struct Backends<E, L, P> {
    pub edit_filter: E,
    pub layout_monitor: L,
    pub input_sources: P,
}

pub struct Controller<E: FilterBackend, L: ChordBackend, P: InputSourceProvider> {
    settings: Settings,
    settings_path: PathBuf,
    store: RemapConfigStore,
    edit_filter: TapLifecycle<E>,
    layout_monitor: TapLifecycle<L>,
    rotator: InputSourceRotator<P>,
    events: broadcast::Sender<DaemonEvent>,
    started_at: Instant,
    rearms: HashMap<FilterKind, VecDeque<Instant>>,
}

impl<E, L, P> Controller<E, L, P>
where
    E: FilterBackend,
    L: ChordBackend,
    P: InputSourceProvider,
{
    /// `store` must already hold the remap view of `settings`; the edit
    /// filter backend reads from a clone of it.
    pub fn new(
        settings: Settings,
        settings_path: PathBuf,
        store: RemapConfigStore,
        backends: Backends<E, L, P>,
        notices: mpsc::Sender<TapNotice>,
        events: broadcast::Sender<DaemonEvent>,
    ) -> Self {
        let mut layout_backend = backends.layout_monitor;
        layout_backend.set_chord_modifier(settings.combo_modifier);

        Self {
            settings,
            settings_path,
            store,
            edit_filter: TapLifecycle::new(
                FilterKind::EditShortcuts,
                backends.edit_filter,
                notices.clone(),
            ),
            layout_monitor: TapLifecycle::new(FilterKind::LayoutShortcut, layout_backend, notices),
            rotator: InputSourceRotator::new(backends.input_sources),
            events,
            started_at: Instant::now(),
            rearms: HashMap::new(),
        }
    }

    /// Install the filters if the persisted settings say so
    pub fn start(&mut self) {
        if self.settings.enabled {
            self.enable_filters();
        } else {
            info!("remapping disabled in settings, filters not installed");
        }
    }

    /// Process messages until both queues close
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<ControlMessage>,
        mut notices: mpsc::Receiver<TapNotice>,
    ) {
        info!("controller started");

        loop {
            tokio::select! {
                Some(message) = commands.recv() => {
                    match message {
                        ControlMessage::Request { request, reply } => {
                            let response = self.handle_request(request);
                            if reply.send(response).is_err() {
                                debug!("requester went away before the reply");
                            }
                        }
                    }
                }
                Some(notice) = notices.recv() => {
                    self.handle_notice(notice);
                }
                else => break,
            }
        }

        info!("controller stopped");
    }

    /// Release both filters and forget cached input sources
    pub fn shutdown(&mut self) {
        self.disable_filters();
        info!("controller shutdown complete");
    }

    pub fn handle_request(&mut self, request: Request) -> Response {
        debug!(?request, "handling request");

        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => Response::Status(self.status()),

            // the server owns the broadcast subscription
            Request::Subscribe => Response::Subscribed,

            Request::SetEnabled { enabled } => {
                self.set_enabled(enabled);
                Response::Ok
            }

            Request::SetEditClasses { classes } => {
                self.settings.edit_classes = classes.clone();
                self.update_remap(move |config| config.set_enabled_classes(classes));
                Response::Ok
            }

            Request::SetComboModifier { modifier } => {
                self.set_combo_modifier(modifier);
                Response::Ok
            }

            Request::SetRdpApps { bundle_ids } => {
                let Some(bundle_ids) = bundle_ids
                    .iter()
                    .map(|id| normalize_bundle_id(id))
                    .collect::<Option<BTreeSet<_>>>()
                else {
                    return empty_bundle_id();
                };
                self.settings.rdp_bundle_identifiers = bundle_ids;
                self.sync_rdp_apps();
                Response::Ok
            }

            Request::AddRdpApp { bundle_id } => {
                let Some(bundle_id) = normalize_bundle_id(&bundle_id) else {
                    return empty_bundle_id();
                };
                if self.settings.rdp_bundle_identifiers.insert(bundle_id) {
                    self.sync_rdp_apps();
                }
                Response::Ok
            }

            Request::RemoveRdpApp { bundle_id } => {
                let Some(bundle_id) = normalize_bundle_id(&bundle_id) else {
                    return empty_bundle_id();
                };
                if self.settings.rdp_bundle_identifiers.remove(&bundle_id) {
                    self.sync_rdp_apps();
                }
                Response::Ok
            }

            Request::SetRdpRemap { enabled } => {
                self.settings.rdp_remap_enabled = enabled;
                self.update_remap(move |config| config.set_rdp_ctrl_to_cmd_remap_enabled(enabled));
                Response::Ok
            }

            Request::SetIgnoreFnForEditCombos { enabled } => {
                self.settings.ignore_fn_for_edit_combos = enabled;
                self.update_remap(move |config| {
                    config.set_ignore_fn_substitution_for_edit_combos(enabled)
                });
                Response::Ok
            }

            Request::AdvanceInputSource => match self.advance_input_source() {
                Ok(source_id) => Response::InputSourceChanged { source_id },
                Err(e @ InputSourceError::NoSelectableSources) => {
                    Response::error("no_selectable_sources", e.to_string())
                }
                Err(e) => Response::error("select_failed", e.to_string()),
            },

            Request::ClearInputSourceCache => {
                self.rotator.clear_cache();
                Response::Ok
            }
        }
    }

    pub fn handle_notice(&mut self, notice: TapNotice) {
        match notice {
            TapNotice::LayoutChord => {
                // failures are already published
                let _ = self.advance_input_source();
            }
            TapNotice::Rearmed {
                filter,
                cause,
                rearm_count,
            } => {
                self.publish(DaemonEvent::FilterRearmed {
                    filter,
                    cause,
                    rearm_count,
                });
                self.rotator.clear_cache();
                self.track_rearm(filter, Instant::now());
            }
        }
    }

    pub fn status(&self) -> DaemonStatus {
        let config = self.store.snapshot();
        let mut enabled_key_codes: Vec<u16> = config.enabled_key_codes().iter().copied().collect();
        enabled_key_codes.sort_unstable();

        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            enabled: self.settings.enabled,
            edit_filter: self.edit_filter.state(),
            layout_monitor: self.layout_monitor.state(),
            combo_modifier: self.settings.combo_modifier,
            combo_label: self.settings.combo_modifier.to_string(),
            edit_classes: EditCommandClass::ALL
                .iter()
                .map(|&class| EditClassStatus {
                    class,
                    label: class.label(),
                    enabled: config.enabled_classes().contains(&class),
                })
                .collect(),
            enabled_key_codes,
            rdp_bundle_identifiers: config.rdp_bundle_identifiers().iter().cloned().collect(),
            rdp_remap_enabled: config.rdp_ctrl_to_cmd_remap_enabled(),
            ignore_fn_for_edit_combos: config.ignore_fn_substitution_for_edit_combos(),
            rearm_count: self.edit_filter.rearm_count() + self.layout_monitor.rearm_count(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.settings.enabled == enabled {
            return;
        }
        self.settings.enabled = enabled;

        if enabled {
            info!("remapping enabled");
            self.enable_filters();
        } else {
            info!("remapping disabled");
            self.disable_filters();
        }
        self.persist();
    }

    fn set_combo_modifier(&mut self, modifier: ComboModifier) {
        if self.settings.combo_modifier == modifier {
            return;
        }
        info!(chord = %modifier, "layout chord changed");
        self.settings.combo_modifier = modifier;
        self.layout_monitor.backend_mut().set_chord_modifier(modifier);

        // the monitor is bound to one chord per registration
        if self.layout_monitor.is_installed() {
            if self.layout_monitor.teardown() {
                self.publish(DaemonEvent::FilterRemoved {
                    filter: FilterKind::LayoutShortcut,
                });
            }
            install_filter(&mut self.layout_monitor, &self.events);
        }
        self.persist();
    }

    fn sync_rdp_apps(&mut self) {
        let ids = self.settings.rdp_bundle_identifiers.clone();
        self.update_remap(move |config| config.set_rdp_bundle_identifiers(ids));
    }

    /// Apply a change to the shared remap config, then add or drop the edit
    /// filter if the enabled key codes became empty or non-empty
    fn update_remap<F>(&mut self, change: F)
    where
        F: FnOnce(&mut RemapConfig),
    {
        let transition = self.store.update(change);

        if self.settings.enabled {
            match transition {
                KeyCodeTransition::BecameEmpty => {
                    info!("no edit shortcuts enabled, removing edit filter");
                    if self.edit_filter.teardown() {
                        self.publish(DaemonEvent::FilterRemoved {
                            filter: FilterKind::EditShortcuts,
                        });
                    }
                }
                KeyCodeTransition::BecameNonEmpty => {
                    install_filter(&mut self.edit_filter, &self.events);
                }
                KeyCodeTransition::Unchanged => {}
            }
        }
        self.persist();
    }

    fn enable_filters(&mut self) {
        if !install_filter(&mut self.layout_monitor, &self.events) {
            // without the grant the edit filter would be refused as well
            if !self.layout_monitor.backend().is_trusted() {
                return;
            }
        }

        if self.store.snapshot().enabled_key_codes().is_empty() {
            debug!("no edit shortcuts enabled, edit filter not installed");
        } else {
            install_filter(&mut self.edit_filter, &self.events);
        }
    }

    fn disable_filters(&mut self) {
        for filter in [
            (self.edit_filter.teardown(), FilterKind::EditShortcuts),
            (self.layout_monitor.teardown(), FilterKind::LayoutShortcut),
        ]
        .into_iter()
        .filter_map(|(removed, kind)| removed.then_some(kind))
        {
            self.publish(DaemonEvent::FilterRemoved { filter });
        }
        self.rotator.clear_cache();
    }

    fn advance_input_source(&mut self) -> Result<String, InputSourceError> {
        match self.rotator.advance() {
            Ok(source_id) => {
                self.publish(DaemonEvent::InputSourceChanged {
                    source_id: source_id.clone(),
                });
                Ok(source_id)
            }
            Err(e @ InputSourceError::NoSelectableSources) => {
                info!("no keyboard input source to switch to");
                self.publish(DaemonEvent::InputSourceUnavailable);
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "input source switch failed");
                Err(e)
            }
        }
    }

    /// Record a re-arm and react if the filter keeps getting disabled
    fn track_rearm(&mut self, filter: FilterKind, now: Instant) {
        let window = self.rearms.entry(filter).or_default();
        window.push_back(now);
        while window
            .front()
            .is_some_and(|&at| now.duration_since(at) > UNSTABLE_WINDOW)
        {
            window.pop_front();
        }

        let recent_rearms = window.len();
        if recent_rearms <= UNSTABLE_REARMS {
            return;
        }
        window.clear();

        warn!(%filter, recent_rearms, "filter keeps getting disabled by the system");
        self.publish(DaemonEvent::FilterUnstable {
            filter,
            recent_rearms,
        });

        let trusted = match filter {
            FilterKind::EditShortcuts => self.edit_filter.backend().is_trusted(),
            FilterKind::LayoutShortcut => self.layout_monitor.backend().is_trusted(),
        };
        if !trusted {
            error!(%filter, "permission revoked while running, removing filters");
            self.disable_filters();
            self.publish(DaemonEvent::PermissionDenied {
                filter,
                remediation: PERMISSION_REMEDIATION.to_string(),
            });
        }
    }

    fn persist(&self) {
        if let Err(e) = self.settings.save(&self.settings_path) {
            warn!(error = %e, path = ?self.settings_path, "failed to save settings");
        }
        self.publish(DaemonEvent::SettingsChanged);
    }

    fn publish(&self, event: DaemonEvent) {
        debug!(%event, "publishing event");
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Trimmed bundle identifier, or `None` when nothing is left
fn normalize_bundle_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    (!id.is_empty()).then(|| id.to_string())
}

fn empty_bundle_id() -> Response {
    Response::error("invalid_bundle_id", "bundle identifier is empty")
}

/// Install one filter, publishing the outcome. Returns whether the filter
/// is live afterwards.
fn install_filter<B: FilterBackend>(
    lifecycle: &mut TapLifecycle<B>,
    events: &broadcast::Sender<DaemonEvent>,
) -> bool {
    let filter = lifecycle.kind();

    match lifecycle.install() {
        Ok(true) => {
            let _ = events.send(DaemonEvent::FilterInstalled { filter });
            true
        }
        Ok(false) => true,
        Err(TapError::PermissionDenied) => {
            warn!(%filter, "permission missing, filter not installed");
            let _ = events.send(DaemonEvent::PermissionDenied {
                filter,
                remediation: PERMISSION_REMEDIATION.to_string(),
            });
            false
        }
        Err(TapError::Unsupported) => {
            warn!(%filter, "event taps unavailable on this platform");
            false
        }
        Err(e) => {
            error!(%filter, error = %e, "failed to install filter");
            false
        }
    }
}
