use std::sync::Arc;
use std::time::Duration;

use rack_cloud::{
    AsgInstance, AutoScalingGroup, Cloud, ContainerDefinition, ContainerInstance, EcsService,
    LifecycleState, LoadBalancerBinding, MemoryCloud, Stack, StackParameter, TaskDefinition,
};
use rack_core::RackConfig;
use rack_deploy::{ErrorKind, Rack, ScaleOptions};
use rack_state::{Build, StateStore};
use tokio_util::sync::CancellationToken;

fn setup() -> (Rack, Arc<MemoryCloud>) {
    let (cloud, memory) = Cloud::memory();
    let mut rack_stack = Stack::new("convox", "UPDATE_COMPLETE");
    rack_stack.parameters.insert("InstanceCount".into(), "3".into());
    rack_stack.parameters.insert("InstanceType".into(), "t2.small".into());
    rack_stack.parameters.insert("Version".into(), "20160101000000".into());
    rack_stack.outputs.insert("Instances".into(), "convox-Instances".into());
    memory.put_stack(rack_stack);

    let mut app_stack = Stack::new("convox-myapp", "UPDATE_COMPLETE");
    app_stack.outputs.insert("Settings".into(), "myapp-settings".into());
    memory.put_stack(app_stack);

    let config = RackConfig {
        rack: "convox".into(),
        cluster: "convox-cluster".into(),
        notification_topic: "notifications".into(),
        ..RackConfig::default()
    };
    let rack = Rack::new(config, cloud, StateStore::open_in_memory().unwrap())
        .with_stack_cache_ttl(Duration::ZERO)
        .with_promotion_poll(Duration::from_millis(10));
    (rack, memory)
}

fn group(states: &[LifecycleState]) -> AutoScalingGroup {
    AutoScalingGroup {
        name: "convox-Instances".into(),
        desired_capacity: states.len() as u32,
        instances: states
            .iter()
            .enumerate()
            .map(|(i, s)| AsgInstance {
                id: format!("i-{i}"),
                lifecycle: *s,
                healthy: true,
            })
            .collect(),
    }
}

#[tokio::test]
async fn system_reports_converging() {
    let (rack, memory) = setup();
    memory.put_group(group(&[LifecycleState::InService, LifecycleState::InService]));

    let system = rack.system_get().await.unwrap();
    assert_eq!(system.status, "running");
    assert_eq!(system.count, 3);
    assert_eq!(system.instance_type, "t2.small");
    assert_eq!(system.version, "20160101000000");

    memory.put_group(group(&[LifecycleState::InService, LifecycleState::Pending]));
    assert_eq!(rack.system_get().await.unwrap().status, "converging");

    memory.state().stacks.get_mut("convox").unwrap().status = "UPDATE_IN_PROGRESS".into();
    assert_eq!(rack.system_get().await.unwrap().status, "updating");
}

#[tokio::test]
async fn system_save_updates_instance_count() {
    let (rack, memory) = setup();
    rack.system_save(5).await.unwrap();

    let state = memory.state();
    let update = state.stack_updates.last().unwrap();
    assert_eq!(update.template_url, None);
    assert!(update.parameters.contains(&StackParameter::Value {
        key: "InstanceCount".into(),
        value: "5".into(),
    }));
    assert!(update.parameters.contains(&StackParameter::UsePrevious {
        key: "InstanceType".into(),
    }));
    assert_eq!(state.stacks["convox"].parameters["InstanceCount"], "5");
    assert_eq!(state.published.last().unwrap().1, "rack:update");
    drop(state);

    assert_eq!(rack.system_save(0).await.unwrap_err().kind(), ErrorKind::Validation);
    let err = rack.system_save(1).await.unwrap_err();
    assert_eq!(err.to_string(), "count must be at least 2");
}

#[tokio::test]
async fn system_save_keeps_room_for_the_widest_service() {
    let (rack, memory) = setup();
    seed_cluster(&memory);
    memory.add_service(EcsService {
        arn: "arn:aws:ecs:us-east-1:123456789012:service/convox-myapp-worker".into(),
        name: "convox-myapp-worker".into(),
        cluster: "convox-cluster".into(),
        task_definition: "td/web".into(),
        desired_count: 4,
        running_count: 4,
        role: None,
        load_balancers: Vec::new(),
        deployment: None,
        events: Vec::new(),
    });
    let updates = memory.state().stack_updates.len();

    let err = rack.system_save(4).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.to_string(), "count must be greater than the widest service (4)");
    assert_eq!(memory.state().stack_updates.len(), updates);

    rack.system_save(5).await.unwrap();
    assert_eq!(memory.state().stacks["convox"].parameters["InstanceCount"], "5");
}

fn seed_cluster(memory: &MemoryCloud) {
    for i in 0..3 {
        memory.add_container_instance(ContainerInstance {
            arn: format!("arn:ci/{i}"),
            instance_id: format!("i-{i}"),
            status: "ACTIVE".into(),
            agent_connected: true,
            registered_cpu: 1024,
            registered_memory: 2048,
        });
    }
    memory.add_service(EcsService {
        arn: "arn:aws:ecs:us-east-1:123456789012:service/convox-myapp-web".into(),
        name: "convox-myapp-web".into(),
        cluster: "convox-cluster".into(),
        task_definition: "td/web".into(),
        desired_count: 1,
        running_count: 1,
        role: None,
        load_balancers: vec![LoadBalancerBinding {
            load_balancer: "lb".into(),
            container: "web".into(),
            port: 3000,
        }],
        deployment: None,
        events: Vec::new(),
    });
    memory.add_task_definition(
        "td/web",
        TaskDefinition {
            family: "convox-myapp-web".into(),
            containers: vec![ContainerDefinition {
                memory: 256,
                ..Default::default()
            }],
            ..Default::default()
        },
    );
}

async fn promoted(rack: &Rack) -> String {
    let mut build = Build::new("myapp");
    build.manifest = "web:\n  image: nginx\n  ports:\n    - 80:3000\n".into();
    rack.store().put_build(&build).unwrap();
    let release = rack.release_create("myapp", Some(&build.id), None).await.unwrap();
    rack.release_promote("myapp", &release.id, CancellationToken::new())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    release.id
}

#[tokio::test]
async fn scale_within_capacity() {
    let (rack, memory) = setup();
    seed_cluster(&memory);
    let release = promoted(&rack).await;

    rack.scale(
        "myapp",
        "web",
        ScaleOptions {
            count: Some(2),
            memory: Some(512),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let state = memory.state();
    let update = state.stack_updates.last().unwrap();
    assert_eq!(update.template_url, None);
    assert!(update.parameters.contains(&StackParameter::Value {
        key: "WebDesiredCount".into(),
        value: "2".into(),
    }));
    assert!(update.parameters.contains(&StackParameter::Value {
        key: "WebMemory".into(),
        value: "512".into(),
    }));
    assert!(update.parameters.contains(&StackParameter::UsePrevious {
        key: "Release".into(),
    }));
    let (_, subject, message) = state.published.last().unwrap();
    assert_eq!(subject, "release:scale");
    assert!(message.contains(&release));
}

#[tokio::test]
async fn scale_rejected_beyond_capacity() {
    let (rack, memory) = setup();
    seed_cluster(&memory);
    promoted(&rack).await;
    let updates = memory.state().stack_updates.len();

    let err = rack
        .scale("myapp", "web", ScaleOptions { memory: Some(4096), ..Default::default() })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "requested memory 4096 greater than instance size 2048");

    let err = rack
        .scale("myapp", "web", ScaleOptions { count: Some(3), ..Default::default() })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.to_string(),
        "requested count 3 for web must be less than the 3 available instances"
    );

    let err = rack
        .scale("myapp", "worker", ScaleOptions { count: Some(1), ..Default::default() })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(memory.state().stack_updates.len(), updates);
}
