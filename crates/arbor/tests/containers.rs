use arbor::context::{self, scope};
use arbor::{
    Args, Container, Context, Error, MapOptions, Restructure, Value, args, dispatch, get_backend, use_backend,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn nd(data: &[f64]) -> Value {
    let ndarray = get_backend("ndarray").unwrap();
    Value::Native(ndarray.from_f64(data, &[data.len()]).unwrap())
}

fn floats(v: &Value) -> Vec<f64> {
    v.as_native().unwrap().to_f64_vec().unwrap()
}

fn sample() -> Container {
    Container::from_pairs([("x", nd(&[1.0, 2.0, 3.0]))])
        .unwrap()
        .set_at_key_chain("y/z", nd(&[4.0, 5.0]))
        .unwrap()
}

#[test]
fn test_map_doubles_every_leaf() {
    init_tracing();
    context::enter(Context::new(), || {
        let c = sample();
        let doubled = c
            .map(|v, _| dispatch("multiply", args![v.clone(), 2]), &MapOptions::default())
            .unwrap();

        assert_eq!(doubled.all_key_chains(), vec!["x", "y/z"]);
        assert_eq!(floats(doubled.at_key_chain("x").unwrap()), vec![2.0, 4.0, 6.0]);
        assert_eq!(floats(doubled.at_key_chain("y/z").unwrap()), vec![8.0, 10.0]);
    });
}

#[test]
fn test_dispatch_over_whole_containers() {
    context::enter(Context::new(), || {
        let c = sample();
        let out = dispatch("add", args![c.clone(), c.clone()]).unwrap();
        let out = out.as_container().unwrap();
        assert_eq!(floats(out.at_key_chain("y/z").unwrap()), vec![8.0, 10.0]);

        let summed = c.add(nd(&[10.0])).unwrap();
        assert_eq!(floats(summed.at_key_chain("x").unwrap()), vec![11.0, 12.0, 13.0]);
    });
}

#[test]
fn test_shape_mismatch_surfaces_as_backend_error() {
    context::enter(Context::new(), || {
        let a = sample();
        let b = sample().set_at_key_chain("x", nd(&[1.0, 2.0])).unwrap();
        let err = a.add(Value::Container(b)).unwrap_err();
        assert!(matches!(err, Error::Backend { ref op, ref backend, .. } if op == "add" && backend == "ndarray"));
    });
}

#[test]
fn test_wrapped_mode_round_trip() {
    context::enter(Context::new(), || {
        context::set_wrapped_mode();
        let out = dispatch("add", args![nd(&[1.0, 2.0]), 1]).unwrap();
        assert!(matches!(out, Value::Array(_)));

        let c = Container::from_pairs([("a", out)]).unwrap();
        let native = c.to_native();
        assert!(matches!(native.at_key_chain("a").unwrap(), Value::Native(_)));
        assert_eq!(native.to_wrapper(), c);
    });
}

#[test]
fn test_restructure_round_trip() {
    let c = sample();
    let moved = c.restructure([("y/z", "w")], true, true).unwrap();
    assert_eq!(moved.all_key_chains(), vec!["x", "w"]);
    assert_eq!(moved.restructure([("w", "y/z")], true, true).unwrap(), c);

    let err = c.restructure([("x", "y/z")], true, false).unwrap_err();
    assert!(matches!(err, Error::KeyChainConflict(_)));

    let sized = c
        .restructure(
            [("x", Restructure::with("len", |v| Ok(Value::from(v.as_native().map_or(0, |n| n.shape()[0])))))],
            false,
            true,
        )
        .unwrap();
    assert_eq!(sized.get("len"), Some(&Value::Int(3)));
}

#[test]
fn test_multi_map_missing_key_chain() {
    let a = sample();
    let b = sample().remove_key_chain("y/z").unwrap();
    let err = Container::multi_map(
        &[Value::Container(a), Value::Container(b)],
        |leaves, _| Ok(leaves[0].clone()),
        &MapOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::KeyChainNotFound(kc) if kc == "y/z"));
}

#[test]
fn test_prune_selects_subtree() {
    let c = sample();
    let y = c.prune_key_chains(["y"], true);
    assert_eq!(y.all_key_chains(), vec!["y/z"]);
    let rest = c.prune_key_chains(["y"], false);
    assert_eq!(rest.all_key_chains(), vec!["x"]);
}

#[test]
fn test_backend_stack_scoping() {
    context::enter(Context::new(), || {
        assert!(matches!(dispatch("add", args![1, 2]), Err(Error::NoBackendFound)));
        {
            let _guard = use_backend(get_backend("ndarray").unwrap());
            let out = dispatch("add", args![1, 2]).unwrap();
            assert_eq!(floats(&out), vec![3.0]);
        }
        assert!(arbor::current_backend().is_none());

        let ndarray = get_backend("ndarray").unwrap();
        let out = dispatch("add", Args::new().arg(1).arg(2).backend(ndarray)).unwrap();
        assert_eq!(floats(&out), vec![3.0]);
    });
}

#[test]
fn test_json_literals() {
    let ndarray = get_backend("ndarray").unwrap();
    let json = serde_json::json!({"w": [[1.0, 2.0], [3.0, 4.0]], "meta": {"steps": 10}});
    let c = Container::from_json(&json, Some(&ndarray)).unwrap();
    assert_eq!(c.at_key_chain("w").unwrap().as_native().unwrap().shape(), vec![2, 2]);
    assert_eq!(c.at_key_chain("meta/steps").unwrap(), &Value::Int(10));
    assert_eq!(c.shapes().at_key_chain("w").unwrap(), &Value::from(vec![2usize, 2]));
}

#[tokio::test]
async fn test_task_contexts_are_independent() {
    init_tracing();
    let wrapped = Context::new().with_wrapped_mode(true);
    let plain = Context::new().with_backend(get_backend("ndarray").unwrap());

    let a = tokio::spawn(scope(wrapped, async {
        tokio::task::yield_now().await;
        dispatch("add", args![nd(&[1.0]), 1]).map(|v| matches!(v, Value::Array(_)))
    }));
    let b = tokio::spawn(scope(plain, async {
        tokio::task::yield_now().await;
        dispatch("add", args![1, 1]).map(|v| matches!(v, Value::Native(_)))
    }));

    assert!(a.await.unwrap().unwrap());
    assert!(b.await.unwrap().unwrap());
}
