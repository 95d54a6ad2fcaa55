use xrt_util::json::{JsonBuilder, JsonNode};

#[test]
fn deeply_nested_document_reads_back_every_field() {
    let mut b = JsonBuilder::new();
    b.begin_object()
        .key("alpha")
        .value(42)
        .key("eta")
        .begin_object()
        .key("iota")
        .value(true)
        .key("mu")
        .value("leaf")
        .end_object()
        .key("nu")
        .begin_array()
        .begin_object()
        .key("xi")
        .value(1)
        .end_object()
        .begin_object()
        .key("xi")
        .value(2)
        .end_object()
        .end_array();
    let node = b.end_object().build();

    assert_eq!(node.get("alpha").unwrap().as_int_or(0), 42);
    let eta = node.get("eta").unwrap();
    assert!(eta.get("iota").unwrap().as_bool_or(false));
    assert_eq!(eta.get("mu").unwrap().as_string_or(""), "leaf");

    let nu = node.get("nu").unwrap().as_array().unwrap();
    assert_eq!(nu.len(), 2);
    assert_eq!(nu[0].get("xi").unwrap().as_int_or(0), 1);
    assert_eq!(nu[1].get("xi").unwrap().as_int_or(0), 2);
}

/// Builds the document:
/// {
///  "alpha": [1, true, 3.14, {"beta": 4, "gamma": 5}, {"delta": 6}, [{"epsilon": [7], "zeta": false}]],
///  "eta": "theta",
///  "iota": {"kappa": [{"lambda": [5.5, [4.4, 3.3], {}, 2.2, 1, 0, {}, [-1], -2.2, -3.3, -4.4, -5.5]}]},
///  "mu": true, "nu": false, "xi": 42, "omicron": [], "pi": 3.141592,
///  "rho": [{"sigma": [{"tau": [{"upsilon": [[[]]]}]}]}]
/// }
#[test]
fn deeply_nested_document_with_mixed_arrays_and_objects_reads_back_every_field() {
    let mut b = JsonBuilder::new();
    b.begin_object()
        .key("alpha")
        .begin_array()
        .value(1)
        .value(true)
        .value(3.14)
        .begin_object()
        .key("beta")
        .value(4)
        .key("gamma")
        .value(5)
        .end_object()
        .begin_object()
        .key("delta")
        .value(6)
        .end_object()
        .begin_array()
        .begin_object()
        .key("epsilon")
        .begin_array()
        .value(7)
        .end_array()
        .key("zeta")
        .value(false)
        .end_object()
        .end_array()
        .end_array()
        .key("eta")
        .value("theta")
        .key("iota")
        .begin_object()
        .key("kappa")
        .begin_array()
        .begin_object()
        .key("lambda")
        .begin_array()
        .value(5.5)
        .begin_array()
        .value(4.4)
        .value(3.3)
        .end_array()
        .begin_object()
        .end_object()
        .value(2.2)
        .value(1)
        .value(0)
        .begin_object()
        .end_object()
        .begin_array()
        .value(-1)
        .end_array()
        .value(-2.2)
        .value(-3.3)
        .value(-4.4)
        .value(-5.5)
        .end_array()
        .end_object()
        .end_array()
        .end_object()
        .key("mu")
        .value(true)
        .key("nu")
        .value(false)
        .key("xi")
        .value(42)
        .key("omicron")
        .begin_array()
        .end_array()
        .key("pi")
        .value(3.141592)
        .key("rho")
        .begin_array()
        .begin_object()
        .key("sigma")
        .begin_array()
        .begin_object()
        .key("tau")
        .begin_array()
        .begin_object()
        .key("upsilon")
        .begin_array()
        .begin_array()
        .begin_array()
        .end_array()
        .end_array()
        .end_array()
        .end_object()
        .end_array()
        .end_object()
        .end_array()
        .end_object()
        .end_array();

    let node = b.end_object().build();

    assert_eq!(node.get("eta").unwrap().as_string_or(""), "theta");
    assert!(node.get("alpha").unwrap().as_array().unwrap()[0].as_bool_or(false));
    assert_eq!(
        node.get("alpha").unwrap().as_array().unwrap()[4]
            .get("delta")
            .unwrap()
            .as_int_or(-1),
        6
    );
    assert_eq!(
        node.get("rho").unwrap().as_array().unwrap()[0]
            .get("sigma")
            .unwrap()
            .as_array()
            .unwrap()[0]
            .get("tau")
            .unwrap()
            .as_array()
            .unwrap()[0]
            .get("upsilon")
            .unwrap()
            .as_array()
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn parse_preserves_array_and_object_shape() {
    let doc = JsonNode::parse(r#"{"rho":[1,2,3],"pi":{"omicron":false}}"#).unwrap();
    let rho = doc.get("rho").unwrap().as_array().unwrap();
    assert_eq!(rho.iter().map(|n| n.as_int_or(0)).sum::<i64>(), 6);
    assert!(!doc.get("pi").unwrap().get("omicron").unwrap().as_bool_or(true));
}
