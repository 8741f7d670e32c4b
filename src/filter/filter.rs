use crate::filter::*;

#[derive(Default, Clone)]
pub struct AFFilter {
    filter_name: String,
    instance_name: String,
    arguments: BTreeMap<String, String>,
    filter: AFAVFilter,
}

impl AFFilter {
    pub fn new<T: ToString>(filter_name_t: T, arguments: BTreeMap<String, String>) -> Result<Self> {
        let filter_name = filter_name_t.to_string();
        let filter = unsafe { avfilter_get_by_name(cstring!(filter_name).as_ptr()) };
        if filter.is_null() {
            return Err(anyhow!("find filter by name failed. name: {}", filter_name));
        }
        Ok(AFFilter {
            instance_name: filter_name.clone(),
            filter_name,
            arguments,
            filter: AFAVFilter::from(filter),
        })
    }

    pub fn create_by_graph(&self, filter_graph: &AFAVFilterGraph) -> Result<AFAVFilterContext> {
        assert!(!self.filter.is_null());
        let mut filter_context: *mut AVFilterContext = ptr::null_mut();
        let arguments = self.format_arguments();
        let arguments_c = cstring!(arguments.clone());
        let arguments_ptr = match arguments.is_empty() {
            true => ptr::null(),
            false => arguments_c.as_ptr(),
        };
        let ret = unsafe {
            avfilter_graph_create_filter(
                &mut filter_context,
                self.filter.as_ptr(),
                cstring!(self.instance_name.clone()).as_ptr(),
                arguments_ptr,
                ptr::null_mut(),
                filter_graph.get())
        };
        if ret < 0 {
            return Err(anyhow!("create filter by graph failed. name: {}, args: {}, error: {:?}", self.filter_name, arguments, averror!(ret)));
        }
        assert!(!filter_context.is_null());

        Ok(AFAVFilterContext::from(filter_context))
    }

    pub fn get_name(&self) -> &String {
        &self.filter_name
    }

    pub fn format_arguments(&self) -> String {
        let mut arg = String::default();
        for (index, (first, second)) in self.arguments.iter().enumerate() {
            if index != 0 {
                arg += ":";
            }
            if first.is_empty() {
                arg += &second.clone().replace(':', r"\:");
            } else if second.is_empty() {
                arg += &first.clone().replace(':', r"\:");
            } else {
                let str = format!("{}={}", &first.clone().replace(':', r"\:"), &second.clone().replace(':', r"\:"));
                arg += str.as_str();
            }
        }
        arg
    }
}
