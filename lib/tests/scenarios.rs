use classflow::jvm::class_file::{
    BytecodeArray, ClassFile, Code, ConstantIndex, ConstantsPool, Method, Version,
};
use classflow::jvm::code::{
    decode, encode, BlockPartition, ClassCode, DependencyForest, FlowGraph, InstructionList,
    LocalIndex, Opcode, Operand, OperandShape,
};
use classflow::jvm::{
    ClassAccessFlags, DecodeError, DecodeErrorKind, Deserialize, Error, MethodAccessFlags,
    Serialize,
};
use classflow::util::Offset;
use std::collections::HashSet;
use std::io::Cursor;

/// Class with a single static method, written out and read back in
fn class_with_method(name: &str, descriptor: &str, code: &[u8]) -> ClassFile {
    let mut constants = ConstantsPool::new();
    let this_class = constants.get_class("Scenario").unwrap();
    let super_class = constants.get_class("java/lang/Object").unwrap();
    let code = Code {
        max_stack: 4,
        max_locals: 4,
        code_array: BytecodeArray(code.to_vec()),
        exception_table: vec![],
        attributes: vec![],
    };
    let method = Method {
        access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        name_index: constants.get_utf8(name).unwrap(),
        descriptor_index: constants.get_utf8(descriptor).unwrap(),
        attributes: vec![constants.get_attribute(&code).unwrap()],
    };
    let class = ClassFile {
        version: Version::JAVA11,
        constants,
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        this_class,
        super_class: Some(super_class),
        interfaces: vec![],
        fields: vec![],
        methods: vec![method],
        attributes: vec![],
    };

    let mut bytes = vec![];
    class.serialize(&mut bytes).unwrap();
    let reloaded = ClassFile::deserialize(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(reloaded, class);
    reloaded
}

fn assert_offsets_increase(instructions: &InstructionList) {
    for pair in instructions.windows(2) {
        assert!(pair[0].offset < pair[1].offset);
        assert_eq!(pair[0].end_offset(), pair[1].offset);
    }
}

#[test]
fn conditional_method_through_class_file() {
    let class = class_with_method(
        "max",
        "(II)I",
        &[
            0x1a, // iload_0
            0x1b, // iload_1
            0xa4, 0x00, 0x07, // if_icmple +7
            0x1a, // iload_0
            0xa7, 0x00, 0x04, // goto +4
            0x1b, // iload_1
            0xac, // ireturn
        ],
    );
    assert_eq!(class.class_name(), Some("Scenario"));

    let classes = ClassCode::new(&class);
    let max = classes.method_named("max").unwrap().unwrap();
    assert_offsets_increase(max.instructions());

    let blocks = max.blocks().unwrap();
    let labels: Vec<String> = blocks.blocks().iter().map(|b| b.label.to_string()).collect();
    assert_eq!(labels, vec!["A", "B", "C"]);

    let graph = max.graph().unwrap();
    for (id, block) in blocks.iter() {
        assert_eq!(graph.in_degree(&id).unwrap(), block.predecessors.len());
    }
    assert_eq!(graph.cyclomatic_complexity(), 2);
    assert_eq!(graph.linear_complexity(), 1);
}

#[test]
fn static_call_tree() {
    let mut constants = ConstantsPool::new();
    let class = constants.get_class("java/lang/Math").unwrap();
    let name = constants.get_utf8("max").unwrap();
    let descriptor = constants.get_utf8("(II)I").unwrap();
    let name_and_type = constants.get_name_and_type(name, descriptor).unwrap();
    let max = constants.get_method_ref(class, name_and_type, false).unwrap();
    let max = ConstantIndex::from(max);

    let bytes = [
        0x1a, // iload_0
        0x1b, // iload_1
        0xb8, (max.0 >> 8) as u8, max.0 as u8, // invokestatic
        0xac, // ireturn
    ];
    let instructions = decode(&bytes).unwrap();
    let call = &instructions[2];
    assert_eq!(call.owner(&constants), Some("java/lang/Math"));
    assert_eq!(call.name(&constants), Some("max"));
    assert_eq!(call.descriptor(&constants), Some("(II)I"));

    // Leave the return off, so the call is a root
    let forest = DependencyForest::build(&instructions[..3], &constants).unwrap();
    let root = forest.node(forest.roots()[0]);
    assert_eq!(root.opcode, Opcode::Invokestatic);
    assert_eq!(root.consuming, 2);
    assert_eq!(root.producing, 1);
    assert_eq!(root.children.len(), 2);

    let forest = DependencyForest::build(&instructions, &constants).unwrap();
    assert_eq!(forest.roots().len(), 1);
    assert_eq!(forest.dependencies().len(), 3);
}

#[test]
fn tableswitch_round_trip() {
    let bytes = [
        0x1a, // 0: iload_0
        0xaa, // 1: tableswitch
        0x00, 0x00, // padding
        0x00, 0x00, 0x00, 0x1f, // default: +31
        0x00, 0x00, 0x00, 0x00, // low: 0
        0x00, 0x00, 0x00, 0x02, // high: 2
        0x00, 0x00, 0x00, 0x1b, // 0: +27
        0x00, 0x00, 0x00, 0x1d, // 1: +29
        0x00, 0x00, 0x00, 0x1f, // 2: +31
        0x04, // 28: iconst_1
        0xac, // 29: ireturn
        0x05, // 30: iconst_2
        0xac, // 31: ireturn
        0x03, // 32: iconst_0
        0xac, // 33: ireturn
    ];
    let instructions = decode(&bytes).unwrap();
    assert_offsets_increase(&instructions);
    match &instructions[1].operand {
        Operand::TableSwitch(table) => {
            assert_eq!((table.low, table.high), (0, 2));
            assert_eq!(table.offsets.len(), 3);
            assert_eq!(table.default, 31);
        }
        other => panic!("expected a tableswitch, got {:?}", other),
    }
    assert_eq!(encode(&instructions).unwrap(), bytes.to_vec());

    let partition = BlockPartition::build(&instructions).unwrap();
    let switch_block = &partition.blocks()[0];
    assert_eq!(switch_block.successors.len(), 3);
    let graph = FlowGraph::from_partition(&partition).unwrap();
    assert_eq!(graph.edge_count(), 3);
}

#[test]
fn wide_field_load_feeds_a_single_store() {
    let mut constants = ConstantsPool::new();
    let class = constants.get_class("Account").unwrap();
    let name = constants.get_utf8("balance").unwrap();
    let descriptor = constants.get_utf8("D").unwrap();
    let name_and_type = constants.get_name_and_type(name, descriptor).unwrap();
    let balance = ConstantIndex::from(constants.get_field_ref(class, name_and_type).unwrap());

    let mut instructions = InstructionList::new();
    instructions
        .push(Opcode::Aload0, Operand::Local(LocalIndex::Implicit))
        .unwrap();
    instructions
        .push(Opcode::Getfield, Operand::Reference(balance))
        .unwrap();
    instructions
        .push(Opcode::Dstore, Operand::Local(LocalIndex::Narrow(4)))
        .unwrap();

    let forest = DependencyForest::build(&instructions, &constants).unwrap();
    let store = forest.node(forest.roots()[0]);
    assert_eq!(store.opcode, Opcode::Dstore);
    assert_eq!(store.children.len(), 1);
    let load = forest.node(store.children[0].node);
    assert_eq!(load.opcode, Opcode::Getfield);
    assert_eq!(load.produced, 2);
}

#[test]
fn unknown_opcode_reports_its_offset() {
    let error = InstructionList::decode(&[0x00, 0x00, 0xff]).unwrap_err();
    assert_eq!(
        error,
        DecodeError {
            offset: Offset(2),
            kind: DecodeErrorKind::UnknownOpcode(0xff),
        }
    );

    match decode(&[0xff]) {
        Err(Error::Decode(error)) => assert_eq!(error.offset, Offset(0)),
        other => panic!("expected a decode error, got {:?}", other),
    }
}

#[test]
fn mixed_code_round_trips() {
    let bytes = [
        0xc4, 0x15, 0x01, 0x00, // wide iload 256
        0xab, // lookupswitch at 4
        0x00, 0x00, 0x00, // padding
        0x00, 0x00, 0x00, 0x1a, // default: +26
        0x00, 0x00, 0x00, 0x01, // 1 pair
        0x00, 0x00, 0x00, 0x2a, // 42
        0x00, 0x00, 0x00, 0x14, // +20
        0x10, 0x07, // 24: bipush 7
        0x11, 0x01, 0x00, // 26: sipush 256
        0xb1, // 29: return
        0x00, // 30: nop
        0x13, 0x00, 0x05, // 31: ldc_w #5
        0x57, // 34: pop
        0xb1, // 35: return
    ];
    let instructions = decode(&bytes).unwrap();
    assert_offsets_increase(&instructions);
    assert_eq!(instructions.end_offset(), Offset(bytes.len()));
    assert_eq!(encode(&instructions).unwrap(), bytes.to_vec());
    assert_eq!(decode(&encode(&instructions).unwrap()).unwrap(), instructions);

    let partition = BlockPartition::build(&instructions).unwrap();
    assert_eq!(partition.len(), 3);
    let mut covered = 0;
    for block in partition.blocks().iter().chain(partition.elided()) {
        covered += block.instruction_count();
    }
    assert_eq!(covered, instructions.len());
}

#[test]
fn every_operand_shape_round_trips() {
    let bytes = [
        0x00, // 0: nop
        0x1a, // 1: iload_0
        0x15, 0x05, // 2: iload 5
        0x02, // 4: iconst_m1
        0x10, 0xfe, // 5: bipush -2
        0x11, 0x12, 0x34, // 7: sipush 0x1234
        0x12, 0x01, // 10: ldc #1
        0x14, 0x00, 0x02, // 12: ldc2_w #2
        0x84, 0x03, 0xff, // 15: iinc 3 -1
        0xc4, // 18: wide
        0x84, 0x01, 0x00, 0x80, 0x00, // 19: iinc 256 -32768
        0xb4, 0x00, 0x04, // 24: getfield #4
        0xb6, 0x00, 0x05, // 27: invokevirtual #5
        0xb9, 0x00, 0x06, 0x02, 0x00, // 30: invokeinterface #6 2
        0xba, 0x00, 0x07, 0x00, 0x00, // 35: invokedynamic #7
        0xbb, 0x00, 0x08, // 40: new #8
        0xc0, 0x00, 0x08, // 43: checkcast #8
        0xbc, 0x0a, // 46: newarray int
        0xc5, 0x00, 0x09, 0x02, // 48: multianewarray #9 2
        0xa7, 0xff, 0xcc, // 52: goto 0
        0xc8, 0xff, 0xff, 0xff, 0xc9, // 55: goto_w 0
        0xc9, 0xff, 0xff, 0xff, 0xc4, // 60: jsr_w 0
        0xaa, 0x00, 0x00, // 65: tableswitch + padding
        0xff, 0xff, 0xff, 0xbf, // default: 0
        0x00, 0x00, 0x00, 0x00, // low: 0
        0x00, 0x00, 0x00, 0x00, // high: 0
        0xff, 0xff, 0xff, 0xbf, // 0: 0
        0xab, 0x00, 0x00, 0x00, // 84: lookupswitch + padding
        0xff, 0xff, 0xff, 0xac, // default: 0
        0x00, 0x00, 0x00, 0x01, // 1 pair
        0x00, 0x00, 0x00, 0x07, // 7
        0xff, 0xff, 0xff, 0xac, // 0
        0xb1, // 104: return
    ];
    let instructions = decode(&bytes).unwrap();
    assert_offsets_increase(&instructions);
    assert_eq!(instructions.end_offset(), Offset(bytes.len()));

    let encoded = encode(&instructions).unwrap();
    assert_eq!(encoded, bytes.to_vec());
    assert_eq!(decode(&encoded).unwrap(), instructions);

    let seen: HashSet<OperandShape> = instructions
        .iter()
        .map(|instruction| instruction.opcode.shape())
        .collect();
    let all: HashSet<OperandShape> = (0..=0xc9)
        .filter_map(Opcode::from_u8)
        .map(Opcode::shape)
        .collect();
    assert_eq!(seen, all);

    // Spot check the shapes with extra fixed bytes
    match instructions[13].operand {
        Operand::InvokeInterface { count, .. } => assert_eq!(count, 2),
        ref other => panic!("expected invokeinterface, got {:?}", other),
    }
    match instructions[18].operand {
        Operand::MultiANewArray { dimensions, .. } => assert_eq!(dimensions, 2),
        ref other => panic!("expected multianewarray, got {:?}", other),
    }
    for position in [19, 20, 21] {
        assert_eq!(instructions[position].jump_targets(), vec![0]);
    }
    for position in [22, 23] {
        assert!(instructions[position].jump_targets().iter().all(|target| *target == 0));
    }
}

#[test]
fn class_files_survive_a_trip_to_disk() {
    let class = class_with_method("one", "()I", &[0x04, 0xac]);
    let path = std::env::temp_dir()
        .join(format!("classflow-{}", std::process::id()))
        .join("Scenario.class");
    class.save_to_path(&path, true).unwrap();
    let reloaded = ClassFile::load_from_path(&path).unwrap();
    let _ = std::fs::remove_dir_all(path.parent().unwrap());

    assert_eq!(reloaded, class);
    let classes = ClassCode::new(&reloaded);
    let one = classes.method_named("one").unwrap().unwrap();
    let opcodes: Vec<Opcode> = one.instructions().iter().map(|i| i.opcode).collect();
    assert_eq!(opcodes, vec![Opcode::Iconst1, Opcode::Ireturn]);
}
