use std::collections::BTreeMap;

use rack_core::RackConfig;
use rack_manifest::load;
use rack_state::{App, Release};
use rack_template::{
    TemplateError, TemplateInput, params, primary_service, synthesise, template_parameters,
};
use serde_json::Value;

fn rack() -> RackConfig {
    RackConfig {
        rack: "convox".into(),
        cluster: "convox-cluster".into(),
        subnets: vec!["subnet-a".into(), "subnet-b".into()],
        vpc: "vpc-1".into(),
        custom_topic: "arn:aws:sns:us-east-1:123456789012:convox-custom".into(),
        registry_host: "registry.example.org".into(),
        ..RackConfig::default()
    }
}

fn release(app: &str, build: Option<&str>) -> Release {
    let mut r = Release::new(app);
    r.id = "RTESTTESTTE".into();
    r.build = build.map(String::from);
    r
}

fn render(manifest: &str, app: &App, release: &Release) -> Result<String, TemplateError> {
    let manifest = load(manifest, &BTreeMap::new())?;
    let rack = rack();
    synthesise(&TemplateInput {
        manifest: &manifest,
        release,
        app,
        rack: &rack,
    })
}

fn doc(s: &str) -> Value {
    serde_json::from_str(s).unwrap()
}

const WEB: &str = "web:\n  image: nginx\n  ports:\n    - 80:3000\n";

#[test]
fn single_web_service() {
    let app = App::new("myapp");
    let out = render(WEB, &app, &release("myapp", None)).unwrap();
    let t = doc(&out);

    let params = template_parameters(&out).unwrap();
    assert_eq!(params["WebDesiredCount"].as_deref(), Some("1"));
    assert_eq!(params["WebPort3000Balancer"].as_deref(), Some("80"));
    assert!(params.contains_key("WebPort3000Host"));
    assert_eq!(params["Release"].as_deref(), Some("RTESTTESTTE"));

    let listeners = t["Resources"]["Balancer"]["Properties"]["Listeners"]
        .as_array()
        .unwrap();
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0]["LoadBalancerPort"]["Ref"], "WebPort3000Balancer");
    assert_eq!(listeners[0]["InstancePort"]["Ref"], "WebPort3000Host");

    assert_eq!(t["Outputs"]["PrimaryProcess"]["Value"], "web");
    assert_eq!(t["Resources"]["WebECSTaskDefinition"]["Type"], "Custom::ECSTaskDefinition");
    let service = &t["Resources"]["WebECSService"]["Properties"];
    assert_eq!(service["Role"]["Ref"], "ServiceRole");
    assert_eq!(service["Name"], "convox-myapp-ServiceWeb");
    assert_eq!(service["DeploymentMinimumPercent"], "50");
    assert_eq!(service["DeploymentMaximumPercent"], "200");
    assert_eq!(
        service["LoadBalancers"][0]["Fn::Join"][1][2],
        Value::String("3000".into())
    );
}

#[test]
fn synthesis_is_byte_identical() {
    let manifest = "web:\n  image: nginx\n  ports:\n    - 80:3000\n    - 443:3000\n";
    let app = App::new("myapp");
    // duplicate container port is rejected, so use distinct ports
    assert!(render(manifest, &app, &release("myapp", None)).is_err());

    let manifest = "web:\n  image: nginx\n  ports:\n    - 80:3000\n    - 443:3001\nworker:\n  image: busybox\n  command: work\n";
    let a = render(manifest, &app, &release("myapp", None)).unwrap();
    let b = render(manifest, &app, &release("myapp", None)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn built_release_uses_registry_image() {
    let app = App::new("myapp");
    let manifest = "web:\n  build: .\n  ports:\n    - 80:3000\n";
    let t = doc(&render(manifest, &app, &release("myapp", Some("BABCDEFGHIJ"))).unwrap());
    assert_eq!(
        t["Resources"]["WebECSTaskDefinition"]["Properties"]["Tasks"][0]["Image"],
        "registry.example.org/myapp-web:BABCDEFGHIJ"
    );
}

#[test]
fn unbuilt_service_without_image_fails() {
    let app = App::new("myapp");
    let err = render("web:\n  build: .\n", &app, &release("myapp", None)).unwrap_err();
    assert!(matches!(err, TemplateError::NoImage(ref s) if s == "web"));
}

#[test]
fn worker_has_no_balancer() {
    let app = App::new("myapp");
    let t = doc(&render("worker:\n  image: busybox\n", &app, &release("myapp", None)).unwrap());
    assert!(t["Resources"].get("ServiceRole").is_none());
    assert!(t["Outputs"].get("PrimaryProcess").is_none());
    assert_eq!(
        t["Resources"]["WorkerECSService"]["Properties"]["LoadBalancers"],
        Value::Array(vec![])
    );
}

#[test]
fn volumes_map_under_app_directory() {
    let app = App::new("myapp");
    let manifest = "web:\n  image: nginx\n  volumes:\n    - /var/run/docker.sock:/var/run/docker.sock\n    - /data:/data\n";
    let t = doc(&render(manifest, &app, &release("myapp", None)).unwrap());
    let volumes = &t["Resources"]["WebECSTaskDefinition"]["Properties"]["Tasks"][0]["Volumes"];
    assert_eq!(volumes[0], "/var/run/docker.sock:/var/run/docker.sock");
    assert_eq!(volumes[1], "/volumes/myapp/data:/data");
}

#[test]
fn primary_follows_recorded_output() {
    let manifest = load(
        "api:\n  image: a\n  ports:\n    - 80:4000\nweb:\n  image: b\n  ports:\n    - 80:3000\n",
        &BTreeMap::new(),
    )
    .unwrap();
    let mut app = App::new("myapp");
    assert_eq!(primary_service(&manifest, &app), Some("web"));
    app.outputs.insert("PrimaryProcess".into(), "api".into());
    assert_eq!(primary_service(&manifest, &app), Some("api"));
    app.outputs.insert("PrimaryProcess".into(), "gone".into());
    assert_eq!(primary_service(&manifest, &app), Some("web"));
}

#[test]
fn secondary_balancer_is_named_after_service() {
    let app = App::new("myapp");
    let manifest = "api:\n  image: a\n  ports:\n    - 80:4000\nweb:\n  image: b\n  ports:\n    - 80:3000\n";
    let t = doc(&render(manifest, &app, &release("myapp", None)).unwrap());
    assert!(t["Resources"].get("Balancer").is_some());
    assert!(t["Resources"].get("BalancerApi").is_some());
    assert_eq!(
        t["Resources"]["BalancerApi"]["Properties"]["LoadBalancerName"]["Fn::Join"][1][1],
        "api"
    );
    assert_eq!(
        params::port_host("api", 4000),
        "ApiPort4000Host"
    );
}
