use rowtrack::*;

#[derive(Entity, Debug, Default, PartialEq)]
struct Summary {
    region: String,
    #[column(name = "Total")]
    total: f64,
}

fn main() {
    let engine = Engine::default();
    let rows = RowSet::new(["region", "Total"]).with_row(vec![Value::Text("eu".into()), Value::F64(2.5)]);
    let loaded = engine.load_untracked::<Summary, _>(rows).unwrap();
    assert_eq!(loaded, vec![Summary { region: "eu".into(), total: 2.5 }]);
    assert!(!EntityDescriptor::<Summary>::of().unwrap().trackable());
}
