use crate::jvm::class_file::{ClassFile, Code, ConstantLookup, ConstantsPool, ExceptionHandler};
use crate::jvm::code::{BlockId, BlockPartition, DependencyForest, FlowGraph, InstructionList};
use crate::jvm::{Error, Name, UnqualifiedName};
use elsa::FrozenMap;
use std::cell::OnceCell;

/// Decoded body of one method, along with lazily built structures over it
///
/// Blocks, the flow graph, and the dependency forest are each built the first time they are
/// requested and then reused. Editing the instructions through
/// [`MethodCode::instructions_mut`] throws all of them away.
pub struct MethodCode<'c, C = ConstantsPool> {
    name: String,
    descriptor: String,
    max_stack: u16,
    max_locals: u16,
    instructions: InstructionList,
    exception_table: Vec<ExceptionHandler>,
    constants: &'c C,

    blocks: OnceCell<BlockPartition>,
    graph: OnceCell<FlowGraph>,
    tree: OnceCell<DependencyForest>,
}

impl<'c, C: ConstantLookup> MethodCode<'c, C> {
    /// Decode the `Code` attribute of a method
    pub fn decode(
        name: &str,
        descriptor: &str,
        code: &Code,
        constants: &'c C,
    ) -> Result<MethodCode<'c, C>, Error> {
        let instructions = InstructionList::decode(&code.code_array.0)?;
        log::debug!(
            "Decoded {}{} ({} instructions, {} exception handlers)",
            name,
            descriptor,
            instructions.len(),
            code.exception_table.len()
        );
        let mut method = MethodCode::new(name, descriptor, instructions, constants);
        method.max_stack = code.max_stack;
        method.max_locals = code.max_locals;
        method.exception_table = code.exception_table.clone();
        Ok(method)
    }

    /// Wrap already decoded instructions
    pub fn new(
        name: &str,
        descriptor: &str,
        instructions: InstructionList,
        constants: &'c C,
    ) -> MethodCode<'c, C> {
        MethodCode {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            max_stack: 0,
            max_locals: 0,
            instructions,
            exception_table: vec![],
            constants,
            blocks: OnceCell::new(),
            graph: OnceCell::new(),
            tree: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    pub fn instructions(&self) -> &InstructionList {
        &self.instructions
    }

    pub fn exception_table(&self) -> &[ExceptionHandler] {
        &self.exception_table
    }

    pub fn constants(&self) -> &'c C {
        self.constants
    }

    /// Edit the instructions, discarding everything built from them
    pub fn instructions_mut(&mut self) -> &mut InstructionList {
        self.invalidate();
        &mut self.instructions
    }

    /// Forget cached blocks, graph, and tree
    pub fn invalidate(&mut self) {
        self.blocks.take();
        self.graph.take();
        self.tree.take();
    }

    pub fn blocks(&self) -> Result<&BlockPartition, Error> {
        if let Some(blocks) = self.blocks.get() {
            return Ok(blocks);
        }
        let blocks = BlockPartition::build(&self.instructions)?;
        Ok(self.blocks.get_or_init(|| blocks))
    }

    pub fn graph(&self) -> Result<&FlowGraph, Error> {
        if let Some(graph) = self.graph.get() {
            return Ok(graph);
        }
        let graph = FlowGraph::from_partition(self.blocks()?)?;
        Ok(self.graph.get_or_init(|| graph))
    }

    /// Dependency forest over the whole method body, ignoring control flow
    pub fn tree(&self) -> Result<&DependencyForest, Error> {
        if let Some(tree) = self.tree.get() {
            return Ok(tree);
        }
        let tree = DependencyForest::build(&self.instructions, self.constants)?;
        Ok(self.tree.get_or_init(|| tree))
    }

    /// Dependency forest over the instructions of one block (not cached)
    ///
    /// Node positions are relative to the start of the block.
    pub fn block_tree(&self, id: BlockId) -> Result<DependencyForest, Error> {
        let blocks = self.blocks()?;
        let block = blocks
            .get(id)
            .ok_or_else(|| Error::MissingVertex(format!("{:?}", id)))?;
        DependencyForest::build(block.instructions(&self.instructions), self.constants)
    }
}

/// Methods of a class, decoded on first request
///
/// Decoded methods are never evicted, so references handed out stay valid for as long as the
/// `ClassCode` lives.
pub struct ClassCode<'c> {
    class: &'c ClassFile,
    methods: FrozenMap<usize, Box<MethodCode<'c>>>,
}

impl<'c> ClassCode<'c> {
    pub fn new(class: &'c ClassFile) -> ClassCode<'c> {
        ClassCode {
            class,
            methods: FrozenMap::new(),
        }
    }

    pub fn class(&self) -> &'c ClassFile {
        self.class
    }

    /// Decoded code of the method at this index in the class file
    ///
    /// Returns `None` for out of range indices and for methods without code.
    pub fn method(&self, index: usize) -> Result<Option<&MethodCode<'c>>, Error> {
        if let Some(method) = self.methods.get(&index) {
            return Ok(Some(method));
        }

        let class = self.class;
        let constants = &class.constants;
        let method = match class.methods.get(index) {
            Some(method) => method,
            None => return Ok(None),
        };
        let code = match method.code(constants)? {
            Some(code) => code,
            None => return Ok(None),
        };
        let name = method
            .name(constants)
            .map_err(|err| Error::MalformedClass(format!("bad method name: {}", err)))?;
        UnqualifiedName::check_valid(name).map_err(Error::MalformedClass)?;
        let descriptor = method
            .descriptor(constants)
            .map_err(|err| {
                Error::MalformedClass(format!("bad descriptor of `{}`: {}", name, err))
            })?;

        let decoded = MethodCode::decode(name, descriptor, &code, constants)?;
        Ok(Some(self.methods.insert(index, Box::new(decoded))))
    }

    /// Decoded code of the first method with this name
    pub fn method_named(&self, name: &str) -> Result<Option<&MethodCode<'c>>, Error> {
        let constants = &self.class.constants;
        let index = self
            .class
            .methods
            .iter()
            .position(|method| method.name(constants) == Ok(name));
        match index {
            Some(index) => self.method(index),
            None => Ok(None),
        }
    }

    /// Number of methods in the class (with or without code)
    pub fn len(&self) -> usize {
        self.class.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class.methods.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{BytecodeArray, Method, Version};
    use crate::jvm::code::{Opcode, Operand};
    use crate::jvm::{ClassAccessFlags, MethodAccessFlags};

    const MAX: [u8; 11] = [
        0x1a, 0x1b, 0xa4, 0x00, 0x07, 0x1a, 0xa7, 0x00, 0x04, 0x1b, 0xac,
    ];

    fn class_with_methods() -> ClassFile {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class("Example").unwrap();
        let code = Code {
            max_stack: 2,
            max_locals: 2,
            code_array: BytecodeArray(MAX.to_vec()),
            exception_table: vec![],
            attributes: vec![],
        };
        let code = constants.get_attribute(&code).unwrap();

        let max = Method {
            access_flags: MethodAccessFlags::STATIC,
            name_index: constants.get_utf8("max").unwrap(),
            descriptor_index: constants.get_utf8("(II)I").unwrap(),
            attributes: vec![code],
        };
        let run = Method {
            access_flags: MethodAccessFlags::ABSTRACT,
            name_index: constants.get_utf8("run").unwrap(),
            descriptor_index: constants.get_utf8("()V").unwrap(),
            attributes: vec![],
        };

        ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT,
            this_class,
            super_class: None,
            interfaces: vec![],
            fields: vec![],
            methods: vec![max, run],
            attributes: vec![],
        }
    }

    #[test]
    fn structures_are_built_once() {
        let class = class_with_methods();
        let classes = ClassCode::new(&class);
        let max = classes.method_named("max").unwrap().unwrap();

        assert_eq!(max.name(), "max");
        assert_eq!(max.max_stack(), 2);
        assert_eq!(max.instructions().len(), 7);

        let blocks = max.blocks().unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(std::ptr::eq(blocks, max.blocks().unwrap()));
        assert_eq!(max.graph().unwrap().cyclomatic_complexity(), 2);
        assert!(std::ptr::eq(max.graph().unwrap(), max.graph().unwrap()));

        // Decoded methods are shared too
        assert!(std::ptr::eq(max, classes.method(0).unwrap().unwrap()));
    }

    #[test]
    fn methods_without_code() {
        let class = class_with_methods();
        let classes = ClassCode::new(&class);
        assert_eq!(classes.len(), 2);
        assert!(classes.method_named("run").unwrap().is_none());
        assert!(classes.method_named("missing").unwrap().is_none());
        assert!(classes.method(7).unwrap().is_none());
    }

    #[test]
    fn illegal_method_names() {
        let mut class = class_with_methods();
        class.methods[0].name_index = class.constants.get_utf8("not/a/name").unwrap();
        let classes = ClassCode::new(&class);
        assert!(matches!(classes.method(0), Err(Error::MalformedClass(_))));
    }

    #[test]
    fn editing_invalidates_caches() {
        let constants = ConstantsPool::new();
        let instructions = InstructionList::decode(&MAX).unwrap();
        let mut method = MethodCode::new("max", "(II)I", instructions, &constants);
        assert_eq!(method.blocks().unwrap().len(), 3);

        // Turn the `goto` into a return, so the middle block no longer jumps
        let goto = method.instructions().position_of(crate::util::Offset(6)).unwrap();
        let edited = method.instructions_mut().get_mut(goto).unwrap();
        edited.opcode = Opcode::Ireturn;
        edited.operand = Operand::None;
        // Shift what follows back over the removed operand bytes, and retarget the jump into it
        for position in goto + 1..method.instructions().len() {
            method.instructions_mut().get_mut(position).unwrap().offset.0 -= 2;
        }
        let branch = method.instructions_mut().get_mut(2).unwrap();
        branch.set_branch_offset(5).unwrap();

        let blocks = method.blocks().unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.blocks()[1].successors.is_empty());
        assert_eq!(method.graph().unwrap().cyclomatic_complexity(), 1);
    }

    #[test]
    fn block_trees() {
        let class = class_with_methods();
        let classes = ClassCode::new(&class);
        let max = classes.method(0).unwrap().unwrap();

        let first = max.block_tree(BlockId(0)).unwrap();
        assert_eq!(first.roots().len(), 1);
        assert_eq!(first.node(first.roots()[0]).opcode, Opcode::IfIcmple);
        assert_eq!(first.node(first.roots()[0]).children.len(), 2);

        // The last block returns a value that is loaded in the same block
        let last = max.block_tree(BlockId(2)).unwrap();
        assert_eq!(last.roots().len(), 1);
        assert!(matches!(max.block_tree(BlockId(9)), Err(Error::MissingVertex(_))));
    }
}
