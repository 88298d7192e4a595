use anyhow::Result;
use futures::future::join_all;
use ingress_api::{networking_v1beta1, ApisixTls, ApisixUpstream};
use ingress_apisix::Apisix;
use ingress_core::recorder::KubeEventRecorder;
use ingress_core::translation::IngressVersion;
use ingress_core::{
    Controller, EndpointMode, EventRecorder, Gateway, Informer, Reconciler, ResourceEventHandler,
    SecretIndex,
};
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1 as networking;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod apisix_tls_controller;
mod apisix_upstream_controller;
mod caches;
mod config;
mod endpoints_controller;
mod ingress_controller;
mod secret_controller;

use apisix_tls_controller::ApisixTlsReconciler;
use apisix_upstream_controller::ApisixUpstreamReconciler;
use caches::Caches;
use config::{Config, LogFormat, Settings};
use endpoints_controller::{EndpointsReconciler, ServiceTrigger};
use ingress_controller::{IngressReconciler, IngressResource};
use secret_controller::SecretReconciler;

const CONTROLLER_NAME: &str = "apisix-ingress-controller";

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match settings.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Spawned tasks plus the signal that stops them
struct Tasks {
    shutdown: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Tasks {
    fn spawn_informer<K>(&mut self, informer: Informer<K>)
    where
        K: kube::Resource<DynamicType = ()>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug
            + Send
            + Sync
            + 'static,
    {
        let mut shutdown = self.shutdown.clone();
        self.handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = informer.run() => {}
                _ = shutdown.changed() => {}
            }
        }));
    }

    fn spawn_controller<R: Reconciler>(&mut self, controller: Arc<Controller<R>>) {
        let mut shutdown = self.shutdown.clone();
        let kind = controller.reconciler().kind();
        self.handles.push(tokio::spawn(async move {
            let stop = async move {
                let _ = shutdown.changed().await;
            };
            if let Err(err) = controller.run(stop).await {
                error!(kind, error = %err, "controller failed");
            }
        }));
    }
}

/// Wires the Ingress informer and controller for the configured version
fn ingress_controller<K: IngressResource>(
    tasks: &mut Tasks,
    client: &Client,
    caches: &Caches,
    translator: &Arc<ingress_core::Translator>,
    gateway: &Arc<dyn Gateway>,
    recorder: &Arc<dyn EventRecorder>,
    settings: &Settings,
) {
    let mut informer = Informer::<K>::new(Api::all(client.clone()));
    let reconciler = IngressReconciler::new(
        informer.store(),
        caches.clone(),
        translator.clone(),
        gateway.clone(),
        settings.ingress_class.clone(),
    );
    let controller = Arc::new(Controller::new(
        Arc::new(reconciler),
        recorder.clone(),
        settings.controller.clone(),
    ));
    informer.add_event_handler(controller.clone());
    tasks.spawn_informer(informer);
    tasks.spawn_controller(controller);
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Config::load()?.validate()?;
    init_tracing(&settings);

    info!(
        apisix = %settings.admin.base_url,
        ingress_version = %settings.ingress_version,
        endpoint_mode = ?settings.endpoint_mode,
        "starting ingress controller"
    );

    let client = Client::try_default().await?;
    let apisix = Apisix::new(&settings.admin)?;
    if let Err(err) = apisix.ping().await {
        warn!(error = %err, "apisix admin api not reachable yet");
    }
    let gateway: Arc<dyn Gateway> = Arc::new(apisix);
    let recorder: Arc<dyn EventRecorder> =
        Arc::new(KubeEventRecorder::new(client.clone(), CONTROLLER_NAME));
    let index = Arc::new(SecretIndex::new());

    let mut services = Informer::<Service>::new(Api::all(client.clone()));
    let mut secrets = Informer::<Secret>::new(Api::all(client.clone()));
    let mut apisix_tls = Informer::<ApisixTls>::new(Api::all(client.clone()));
    let mut apisix_upstreams = Informer::<ApisixUpstream>::new(Api::all(client.clone()));
    let (mut endpoints, mut endpoint_slices) = match settings.endpoint_mode {
        EndpointMode::Endpoints => (
            Some(Informer::<Endpoints>::new(Api::all(client.clone()))),
            None,
        ),
        EndpointMode::EndpointSlice => (
            None,
            Some(Informer::<EndpointSlice>::new(Api::all(client.clone()))),
        ),
    };

    let caches = Caches {
        services: services.store(),
        endpoints: endpoints.as_ref().map(Informer::store),
        endpoint_slices: endpoint_slices.as_ref().map(Informer::store),
        secrets: secrets.store(),
        apisix_tls: apisix_tls.store(),
        apisix_upstreams: apisix_upstreams.store(),
    };
    let translator = Arc::new(caches.translator()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Tasks {
        shutdown: shutdown_rx,
        handles: Vec::new(),
    };

    let tls = Arc::new(Controller::new(
        Arc::new(ApisixTlsReconciler::new(
            caches.clone(),
            translator.clone(),
            index.clone(),
            gateway.clone(),
        )),
        recorder.clone(),
        settings.controller.clone(),
    ));
    apisix_tls.add_event_handler(tls.clone());

    let secret = Arc::new(Controller::new(
        Arc::new(SecretReconciler::new(caches.clone(), index.clone(), gateway.clone())),
        recorder.clone(),
        settings.controller.clone(),
    ));
    secrets.add_event_handler(secret.clone());

    let upstream = Arc::new(Controller::new(
        Arc::new(ApisixUpstreamReconciler::new(
            caches.clone(),
            translator.clone(),
            gateway.clone(),
        )),
        recorder.clone(),
        settings.controller.clone(),
    ));
    apisix_upstreams.add_event_handler(upstream.clone());

    let endpoints_controller = Arc::new(Controller::new(
        Arc::new(EndpointsReconciler::new(caches.clone(), translator.clone(), gateway.clone())),
        recorder.clone(),
        settings.controller.clone(),
    ));
    services.add_event_handler(endpoints_controller.clone());
    let trigger = Arc::new(ServiceTrigger::new(endpoints_controller.clone()));
    if let Some(informer) = endpoints.as_mut() {
        informer.add_event_handler(trigger.clone() as Arc<dyn ResourceEventHandler<Endpoints>>);
    }
    if let Some(informer) = endpoint_slices.as_mut() {
        informer.add_event_handler(trigger as Arc<dyn ResourceEventHandler<EndpointSlice>>);
    }

    match settings.ingress_version {
        IngressVersion::V1 => ingress_controller::<networking::Ingress>(
            &mut tasks,
            &client,
            &caches,
            &translator,
            &gateway,
            &recorder,
            &settings,
        ),
        IngressVersion::V1beta1 => ingress_controller::<networking_v1beta1::Ingress>(
            &mut tasks,
            &client,
            &caches,
            &translator,
            &gateway,
            &recorder,
            &settings,
        ),
    }

    tasks.spawn_informer(services);
    tasks.spawn_informer(secrets);
    tasks.spawn_informer(apisix_tls);
    tasks.spawn_informer(apisix_upstreams);
    if let Some(informer) = endpoints {
        tasks.spawn_informer(informer);
    }
    if let Some(informer) = endpoint_slices {
        tasks.spawn_informer(informer);
    }
    tasks.spawn_controller(tls);
    tasks.spawn_controller(secret);
    tasks.spawn_controller(upstream);
    tasks.spawn_controller(endpoints_controller);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining controllers");
    let _ = shutdown_tx.send(true);

    for result in join_all(tasks.handles).await {
        if let Err(err) = result {
            error!(error = %err, "task panicked");
        }
    }
    info!("ingress controller stopped");
    Ok(())
}
