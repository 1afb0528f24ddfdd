// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Hash-aggregation sink: plan descriptor, per-driver operator and factory.
//!
//! Responsibilities:
//! - Validates the aggregation plan and resolves kernels, key fields and the executor.
//! - Creates one shared state per driver and a sink operator feeding it.
//! - Reports the local exchange the sink wants for its input.
//!
//! Key exported interfaces:
//! - Types: `AggSinkPlan`, `AggSinkOptions`, `AggExecutor`, `AggSinkOperatorX`,
//!   `AggSinkOperator`, `AggSinkOperatorFactory`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arrow::datatypes::{DataType, Field};

use crate::common::config;
use crate::exec::chunk::Chunk;
use crate::exec::expr::agg::{AggFunction, AggKernelSet, build_kernel_set};
use crate::exec::expr::{ExprArena, ExprId};
use crate::exec::hash_table::pick_group_key_strategy;
use crate::exec::operators::aggregate::shared_state::AggSharedState;
use crate::exec::operators::aggregate::sink_local_state::AggSinkLocalState;
use crate::exec::pipeline::dependency::DependencyHandle;
use crate::exec::pipeline::distribution::{LocalExchangeDesc, LocalExchangeType};
use crate::exec::pipeline::operator::{Operator, SinkOperator, SourceState};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::exec::spill::SpillStreamManagerRef;
use crate::exec::spill::block_spill_manager::BlockSpillManager;
use crate::hashagg_logging::debug;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::{OperatorProfiles, RuntimeProfile};
use crate::runtime::runtime_state::RuntimeState;

/// Aggregation as planned.
#[derive(Clone, Debug)]
pub struct AggSinkPlan {
    pub node_id: i32,
    pub exprs: Arc<ExprArena>,
    pub group_by: Vec<ExprId>,
    pub group_by_names: Vec<String>,
    pub functions: Vec<AggFunction>,
    pub function_names: Vec<String>,
    /// Inputs are intermediate states of an earlier phase.
    pub is_merge: bool,
    /// Output finalized values rather than intermediate states.
    pub needs_finalize: bool,
    pub limit: Option<usize>,
    /// A HAVING predicate follows the aggregation.
    pub have_conjuncts: bool,
    pub is_streaming: bool,
    pub is_colocate: bool,
    pub child_ignores_data_distribution: bool,
    pub partition_exprs: Vec<ExprId>,
}

impl AggSinkPlan {
    /// A blocking, finalizing, non-merge aggregation with nothing else set.
    pub fn new(
        exprs: Arc<ExprArena>,
        group_by: Vec<ExprId>,
        functions: Vec<AggFunction>,
    ) -> Self {
        let group_by_names = (0..group_by.len()).map(|i| format!("k{i}")).collect();
        let function_names = (0..functions.len()).map(|i| format!("agg_{i}")).collect();
        let is_merge = functions.iter().any(|f| f.input_is_intermediate);
        Self {
            node_id: -1,
            exprs,
            group_by,
            group_by_names,
            functions,
            function_names,
            is_merge,
            needs_finalize: true,
            limit: None,
            have_conjuncts: false,
            is_streaming: false,
            is_colocate: false,
            child_ignores_data_distribution: false,
            partition_exprs: Vec::new(),
        }
    }
}

/// Runtime knobs of the sink, normally read from the application config.
#[derive(Clone, Debug)]
pub struct AggSinkOptions {
    pub state_arena_block_size: usize,
    pub streaming_queue_capacity: usize,
    pub spill_enable: bool,
    pub spill_partition_count_bits: u32,
    /// Resident bytes above which the table is spilled (or flushed when streaming).
    /// `None` never triggers before end of stream.
    pub spill_bytes_threshold: Option<usize>,
}

impl Default for AggSinkOptions {
    fn default() -> Self {
        Self {
            state_arena_block_size: 64 * 1024,
            streaming_queue_capacity: 8,
            spill_enable: false,
            spill_partition_count_bits: 4,
            spill_bytes_threshold: None,
        }
    }
}

impl AggSinkOptions {
    pub fn from_app_config() -> Self {
        Self {
            state_arena_block_size: config::state_arena_block_size(),
            streaming_queue_capacity: config::streaming_queue_capacity(),
            spill_enable: config::spill_enable(),
            spill_partition_count_bits: config::spill_partition_count_bits(),
            spill_bytes_threshold: config::spill_agg_bytes_threshold(),
        }
    }
}

/// Batch routine picked from whether the aggregation has keys and merges states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggExecutor {
    ExecuteWithoutKey,
    MergeWithoutKey,
    ExecuteWithKey,
    MergeWithKey,
}

impl AggExecutor {
    pub fn select(has_keys: bool, is_merge: bool) -> Self {
        match (has_keys, is_merge) {
            (false, false) => AggExecutor::ExecuteWithoutKey,
            (false, true) => AggExecutor::MergeWithoutKey,
            (true, false) => AggExecutor::ExecuteWithKey,
            (true, true) => AggExecutor::MergeWithKey,
        }
    }

    pub fn has_keys(self) -> bool {
        matches!(self, AggExecutor::ExecuteWithKey | AggExecutor::MergeWithKey)
    }

    pub fn is_merge(self) -> bool {
        matches!(self, AggExecutor::MergeWithoutKey | AggExecutor::MergeWithKey)
    }
}

/// What `prepare` resolves from the plan.
#[derive(Clone, Debug)]
pub(crate) struct PreparedAggSink {
    pub(crate) kernels: AggKernelSet,
    pub(crate) key_fields: Vec<Field>,
    pub(crate) agg_inputs: Vec<Option<ExprId>>,
    pub(crate) executor: AggExecutor,
    /// Group cap, set only when rows past it may bypass the table.
    pub(crate) limit: Option<usize>,
}

/// Plan-level sink descriptor shared by every driver.
#[derive(Debug)]
pub struct AggSinkOperatorX {
    name: String,
    plan: AggSinkPlan,
    options: AggSinkOptions,
    prepared: Option<PreparedAggSink>,
}

impl AggSinkOperatorX {
    pub fn new(plan: AggSinkPlan, options: AggSinkOptions) -> Self {
        let name = if plan.node_id >= 0 {
            format!("AGGREGATION_SINK (id={})", plan.node_id)
        } else {
            "AGGREGATION_SINK".to_string()
        };
        Self {
            name,
            plan,
            options,
            prepared: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plan(&self) -> &AggSinkPlan {
        &self.plan
    }

    pub fn options(&self) -> &AggSinkOptions {
        &self.options
    }

    /// Check the plan for contradictions. Nothing is built yet.
    pub fn init(&self) -> Result<(), String> {
        let plan = &self.plan;
        if plan.group_by_names.len() != plan.group_by.len() {
            return Err(format!(
                "group by names length {} != group by length {}",
                plan.group_by_names.len(),
                plan.group_by.len()
            ));
        }
        if plan.function_names.len() != plan.functions.len() {
            return Err(format!(
                "aggregate names length {} != aggregate function length {}",
                plan.function_names.len(),
                plan.functions.len()
            ));
        }
        for func in &plan.functions {
            if func.inputs.len() > 1 {
                return Err(format!(
                    "aggregate function {} takes at most one argument, got {}",
                    func.name,
                    func.inputs.len()
                ));
            }
            if func.input_is_intermediate != plan.is_merge {
                return Err(format!(
                    "aggregate function {} mixes merge and update inputs (is_merge={})",
                    func.name, plan.is_merge
                ));
            }
        }
        for id in plan.group_by.iter().chain(plan.partition_exprs.iter()) {
            if plan.exprs.data_type(*id).is_none() {
                return Err(format!("invalid group by expression {:?}", id));
            }
        }
        if plan.is_streaming && self.options.spill_enable {
            return Err("streaming aggregation cannot spill".to_string());
        }
        Ok(())
    }

    /// Resolve kernels, key fields and the executor.
    pub fn prepare(&mut self) -> Result<(), String> {
        let plan = &self.plan;
        let mut input_types = Vec::with_capacity(plan.functions.len());
        let mut agg_inputs = Vec::with_capacity(plan.functions.len());
        for func in &plan.functions {
            match func.inputs.first() {
                Some(id) => {
                    let data_type = plan.exprs.data_type(*id).ok_or_else(|| {
                        format!("invalid input expression for aggregate {}", func.name)
                    })?;
                    input_types.push(Some(data_type.clone()));
                    agg_inputs.push(Some(*id));
                }
                None => {
                    input_types.push(None);
                    agg_inputs.push(None);
                }
            }
        }
        let kernels = build_kernel_set(&plan.functions, &input_types)?;

        let key_types = plan
            .group_by
            .iter()
            .map(|id| {
                plan.exprs
                    .data_type(*id)
                    .cloned()
                    .ok_or_else(|| format!("invalid group by expression {:?}", id))
            })
            .collect::<Result<Vec<DataType>, String>>()?;
        let strategy = pick_group_key_strategy(&key_types)?;
        let key_fields = plan
            .group_by_names
            .iter()
            .zip(key_types)
            .map(|(name, data_type)| Field::new(name, data_type, true))
            .collect();

        let executor = AggExecutor::select(!plan.group_by.is_empty(), plan.is_merge);
        let limit = plan
            .limit
            .filter(|_| !plan.have_conjuncts && plan.needs_finalize && executor.has_keys());
        debug!(
            "{} prepared: executor={:?} key_strategy={:?} limit={:?}",
            self.name, executor, strategy, limit
        );
        self.prepared = Some(PreparedAggSink {
            kernels,
            key_fields,
            agg_inputs,
            executor,
            limit,
        });
        Ok(())
    }

    pub(crate) fn prepared(&self) -> Result<&PreparedAggSink, String> {
        self.prepared
            .as_ref()
            .ok_or_else(|| format!("{} used before prepare", self.name))
    }

    pub fn executor(&self) -> Result<AggExecutor, String> {
        Ok(self.prepared()?.executor)
    }

    /// Build the state one driver's sink writes into and its reader consumes.
    pub fn create_shared_state(&self) -> Result<AggSharedState, String> {
        let prepared = self.prepared()?;
        let queue_capacity = self
            .plan
            .is_streaming
            .then_some(self.options.streaming_queue_capacity);
        AggSharedState::new(
            prepared.kernels.clone(),
            prepared.key_fields.clone(),
            &self.plan.function_names,
            self.options.state_arena_block_size,
            self.options.spill_partition_count_bits,
            queue_capacity,
        )
    }

    pub fn get_local_exchange_type(&self) -> LocalExchangeType {
        if self.plan.group_by.is_empty() {
            if self.plan.needs_finalize || self.plan.child_ignores_data_distribution {
                LocalExchangeType::Passthrough
            } else {
                LocalExchangeType::Noop
            }
        } else if self.plan.is_colocate {
            LocalExchangeType::BucketHashShuffle
        } else {
            LocalExchangeType::HashShuffle
        }
    }

    pub fn get_local_shuffle_exprs(&self) -> Vec<ExprId> {
        self.plan.partition_exprs.clone()
    }

    pub fn local_exchange_desc(&self) -> LocalExchangeDesc {
        LocalExchangeDesc {
            exchange_type: self.get_local_exchange_type(),
            shuffle_exprs: self.get_local_shuffle_exprs(),
        }
    }
}

/// Per-driver sink.
pub struct AggSinkOperator {
    name: String,
    local: AggSinkLocalState,
    finished: bool,
}

impl AggSinkOperator {
    pub fn new(
        op: Arc<AggSinkOperatorX>,
        shared: Arc<AggSharedState>,
        spill_manager: Option<SpillStreamManagerRef>,
    ) -> Result<Self, String> {
        let name = op.name().to_string();
        let profile = RuntimeProfile::new(name.clone());
        let local = AggSinkLocalState::new(op, shared, spill_manager, profile)?;
        Ok(Self {
            name,
            local,
            finished: false,
        })
    }

    pub fn local_state(&self) -> &AggSinkLocalState {
        &self.local
    }

    /// Feed one chunk. `Finished` also ends the input.
    pub fn sink(
        &mut self,
        state: &RuntimeState,
        chunk: &Chunk,
        source_state: SourceState,
    ) -> Result<(), String> {
        if self.finished {
            return Err(format!("{} received input after end of stream", self.name));
        }
        self.local.sink(state, chunk, source_state.is_eos())?;
        if source_state.is_eos() {
            self.finished = true;
        }
        Ok(())
    }
}

impl Operator for AggSinkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.local.set_mem_tracker(tracker);
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        self.local.open(profiles.unique);
    }

    fn close(&mut self, state: &RuntimeState) -> Result<(), String> {
        self.local.close(state)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn as_sink_mut(&mut self) -> Option<&mut dyn SinkOperator> {
        Some(self)
    }
}

impl SinkOperator for AggSinkOperator {
    fn need_input(&self) -> bool {
        !self.finished && self.local.dependency().is_ready()
    }

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<(), String> {
        self.sink(state, &chunk, SourceState::DependOnSource)
    }

    fn set_finishing(&mut self, state: &RuntimeState) -> Result<(), String> {
        if self.finished {
            return Ok(());
        }
        let empty = Chunk::empty(self.local.shared().intermediate_schema());
        self.sink(state, &empty, SourceState::Finished)
    }

    fn sink_dependency(&self) -> Option<DependencyHandle> {
        Some(self.local.dependency().handle())
    }
}

/// Creates one sink per driver, each with its own shared state.
pub struct AggSinkOperatorFactory {
    op: Arc<AggSinkOperatorX>,
    spill_manager: Option<SpillStreamManagerRef>,
    shared_states: Mutex<HashMap<i32, Arc<AggSharedState>>>,
}

impl AggSinkOperatorFactory {
    /// Validate and prepare `op`. A spilling aggregation without an injected manager
    /// gets a local-disk one from the application config.
    pub fn new(
        mut op: AggSinkOperatorX,
        spill_manager: Option<SpillStreamManagerRef>,
    ) -> Result<Self, String> {
        op.init()?;
        op.prepare()?;
        let spill_manager = match spill_manager {
            Some(manager) => Some(manager),
            None if op.options().spill_enable => {
                let manager: SpillStreamManagerRef = BlockSpillManager::from_app_config()?;
                Some(manager)
            }
            None => None,
        };
        Ok(Self {
            op: Arc::new(op),
            spill_manager,
            shared_states: Mutex::new(HashMap::new()),
        })
    }

    pub fn operator_x(&self) -> &Arc<AggSinkOperatorX> {
        &self.op
    }

    /// State of driver `driver_id`, once its sink was created.
    pub fn shared_state(&self, driver_id: i32) -> Option<Arc<AggSharedState>> {
        self.shared_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&driver_id)
            .cloned()
    }

    /// Same as `create`, without erasing the operator type.
    pub fn create_sink(&self, driver_id: i32) -> Result<AggSinkOperator, String> {
        let shared = Arc::new(self.op.create_shared_state()?);
        self.shared_states
            .lock()
            .map_err(|_| "aggregation shared state map lock poisoned".to_string())?
            .insert(driver_id, Arc::clone(&shared));
        AggSinkOperator::new(Arc::clone(&self.op), shared, self.spill_manager.clone())
    }
}

impl OperatorFactory for AggSinkOperatorFactory {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn create(&self, _dop: i32, driver_id: i32) -> Result<Box<dyn Operator>, String> {
        Ok(Box::new(self.create_sink(driver_id)?))
    }

    fn is_sink(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::expr::agg::AggFunction;

    fn plan(keys: usize) -> AggSinkPlan {
        let mut exprs = ExprArena::default();
        let group_by = (0..keys)
            .map(|i| exprs.column_ref(i, DataType::Int64))
            .collect::<Vec<_>>();
        let value = exprs.column_ref(keys, DataType::Int64);
        AggSinkPlan::new(
            Arc::new(exprs),
            group_by,
            vec![AggFunction::new("sum", vec![value])],
        )
    }

    #[test]
    fn executor_follows_keys_and_merge() {
        assert_eq!(AggExecutor::select(false, false), AggExecutor::ExecuteWithoutKey);
        assert_eq!(AggExecutor::select(false, true), AggExecutor::MergeWithoutKey);
        assert_eq!(AggExecutor::select(true, false), AggExecutor::ExecuteWithKey);
        assert_eq!(AggExecutor::select(true, true), AggExecutor::MergeWithKey);

        let mut op = AggSinkOperatorX::new(plan(1), AggSinkOptions::default());
        op.init().expect("init");
        op.prepare().expect("prepare");
        assert_eq!(op.executor().expect("executor"), AggExecutor::ExecuteWithKey);
    }

    #[test]
    fn init_rejects_mixed_merge_inputs() {
        let mut plan = plan(1);
        plan.functions.push(AggFunction::merging("count", ExprId(1)));
        plan.function_names.push("c".to_string());
        let op = AggSinkOperatorX::new(plan, AggSinkOptions::default());
        let err = op.init().expect_err("mixed");
        assert!(err.contains("mixes merge and update"), "{err}");
    }

    #[test]
    fn init_rejects_streaming_with_spill() {
        let mut plan = plan(1);
        plan.is_streaming = true;
        plan.needs_finalize = false;
        let options = AggSinkOptions {
            spill_enable: true,
            ..AggSinkOptions::default()
        };
        let err = AggSinkOperatorX::new(plan, options)
            .init()
            .expect_err("streaming spill");
        assert!(err.contains("cannot spill"), "{err}");
    }

    #[test]
    fn limit_only_applies_to_finalizing_aggregation_without_having() {
        let mut with_having = plan(1);
        with_having.limit = Some(10);
        with_having.have_conjuncts = true;
        let mut op = AggSinkOperatorX::new(with_having, AggSinkOptions::default());
        op.prepare().expect("prepare");
        assert_eq!(op.prepared().expect("prepared").limit, None);

        let mut limited = plan(1);
        limited.limit = Some(10);
        let mut op = AggSinkOperatorX::new(limited, AggSinkOptions::default());
        op.prepare().expect("prepare");
        assert_eq!(op.prepared().expect("prepared").limit, Some(10));
    }

    #[test]
    fn local_exchange_type_by_shape() {
        let mut no_key = plan(0);
        no_key.needs_finalize = false;
        let op = AggSinkOperatorX::new(no_key.clone(), AggSinkOptions::default());
        assert_eq!(op.get_local_exchange_type(), LocalExchangeType::Noop);
        no_key.child_ignores_data_distribution = true;
        let op = AggSinkOperatorX::new(no_key, AggSinkOptions::default());
        assert_eq!(op.get_local_exchange_type(), LocalExchangeType::Passthrough);

        let mut keyed = plan(2);
        keyed.partition_exprs = keyed.group_by.clone();
        let op = AggSinkOperatorX::new(keyed.clone(), AggSinkOptions::default());
        assert_eq!(op.get_local_exchange_type(), LocalExchangeType::HashShuffle);
        assert_eq!(op.get_local_shuffle_exprs(), keyed.group_by);
        keyed.is_colocate = true;
        let op = AggSinkOperatorX::new(keyed, AggSinkOptions::default());
        assert_eq!(
            op.local_exchange_desc().exchange_type,
            LocalExchangeType::BucketHashShuffle
        );
    }

    #[test]
    fn factory_registers_shared_state_per_driver() {
        let op = AggSinkOperatorX::new(plan(1), AggSinkOptions::default());
        let factory = AggSinkOperatorFactory::new(op, None).expect("factory");
        assert!(factory.is_sink());
        assert!(factory.shared_state(0).is_none());
        let sink = factory.create(2, 1).expect("create");
        assert_eq!(sink.name(), "AGGREGATION_SINK");
        let shared = factory.shared_state(1).expect("shared");
        assert_eq!(shared.num_keys(), 1);
    }
}
